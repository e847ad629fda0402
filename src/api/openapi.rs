use super::handlers::{admin, auth, health};
use utoipa::openapi::{
    Components, Contact, InfoBuilder, License, OpenApiBuilder, Tag,
    security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Router that also drives the `OpenAPI` document.
///
/// Endpoints registered with `.routes(routes!(...))` are both served and
/// documented. `/` and `/docs` are mounted outside and stay undocumented.
pub(crate) fn api_router() -> OpenApiRouter {
    let mut router = OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        .routes(routes!(auth::register::register))
        .routes(routes!(auth::login::login))
        .routes(routes!(auth::refresh::refresh))
        .routes(routes!(auth::logout::logout))
        .routes(routes!(auth::me::me))
        .routes(routes!(auth::password_reset::request_reset))
        .routes(routes!(auth::password_reset::confirm_reset))
        .routes(routes!(admin::unlock_user))
        .routes(routes!(admin::disable_user));

    let openapi = router.get_openapi_mut();
    openapi.tags = Some(vec![
        tag("auth", "Login, token rotation, logout and password reset"),
        tag("admin", "Account administration (Admin role)"),
        tag("health", "Service health"),
    ]);
    openapi
        .components
        .get_or_insert_with(Components::new)
        .add_security_scheme(
            "bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );

    router
}

fn tag(name: &str, description: &str) -> Tag {
    let mut tag = Tag::new(name);
    tag.description = Some(description.to_string());
    tag
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact(env!("CARGO_PKG_AUTHORS"));
    info.license = optional_str(env!("CARGO_PKG_LICENSE")).map(|identifier| {
        let mut license = License::new(identifier);
        license.identifier = Some(identifier.to_string());
        license
    });

    OpenApiBuilder::new().info(info).build()
}

/// Contact from the first Cargo author (`Name <email>`, `;` separated).
fn cargo_contact(authors: &str) -> Option<Contact> {
    let (name, email) = parse_author(authors.split(';').next()?.trim());
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn optional_str(value: &str) -> Option<&str> {
    Some(value.trim()).filter(|value| !value.is_empty())
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    match author.split_once('<') {
        Some((name, email)) => (
            optional_str(name),
            optional_str(email.trim_end_matches('>')),
        ),
        None => (optional_str(author), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_author_with_email() {
        assert_eq!(
            parse_author("Team ZTIAM <team@ztiam.dev>"),
            (Some("Team ZTIAM"), Some("team@ztiam.dev"))
        );
        assert_eq!(parse_author("Solo"), (Some("Solo"), None));
        assert_eq!(parse_author("  "), (None, None));
    }

    #[test]
    fn cargo_contact_uses_first_author() {
        let contact = cargo_contact("A <a@ex.com>; B <b@ex.com>");
        assert_eq!(
            contact.and_then(|contact| contact.email),
            Some("a@ex.com".to_string())
        );
        assert!(cargo_contact("").is_none());
    }

    #[test]
    fn document_lists_every_endpoint() {
        let doc = openapi();
        for path in [
            "/health",
            "/v1/auth/register",
            "/v1/auth/login",
            "/v1/auth/refresh",
            "/v1/auth/logout",
            "/v1/auth/me",
            "/v1/auth/password-reset/request",
            "/v1/auth/password-reset/confirm",
            "/v1/admin/users/unlock",
            "/v1/admin/users/disable",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
        assert!(
            doc.components
                .as_ref()
                .is_some_and(|components| components.security_schemes.contains_key("bearer"))
        );
    }
}
