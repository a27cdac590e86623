use super::handlers::{auth, health};
use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    // Reuse the same router wiring and only return the generated OpenAPI spec.
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Add new endpoints here via `.routes(routes!(...))` so they are both served
/// and included in the generated `OpenAPI` spec. Routes added outside (like
/// `/`) are intentionally not documented.
pub(crate) fn api_router() -> OpenApiRouter {
    let mut user_tag = Tag::new("user-auth");
    user_tag.description = Some("Phone/email signup, login, and recovery".to_string());

    let mut admin_tag = Tag::new("admin-auth");
    admin_tag.description = Some("Admin login and session endpoints".to_string());

    let mut accounts_tag = Tag::new("admin-accounts");
    accounts_tag.description = Some("Admin account management".to_string());

    let mut admin_users_tag = Tag::new("admin-users");
    admin_users_tag.description = Some("Admin operations on user accounts".to_string());

    let mut common_tag = Tag::new("common");
    common_tag.description = Some("Endpoints shared across principal kinds".to_string());

    let mut openapi = cargo_openapi();
    openapi.tags = Some(vec![
        user_tag,
        admin_tag,
        accounts_tag,
        admin_users_tag,
        common_tag,
    ]);

    // `routes!` reads #[utoipa::path] to bind HTTP method + path and add the
    // route to OpenAPI.
    let router = OpenApiRouter::with_openapi(openapi)
        .routes(routes!(health::health))
        .routes(routes!(auth::phone::send_login_code))
        .routes(routes!(auth::phone::verify_login_code))
        .routes(routes!(auth::phone::phone_signup))
        .routes(routes!(auth::account::email_signup))
        .routes(routes!(auth::account::login))
        .routes(routes!(auth::account::refresh_token))
        .routes(routes!(auth::account::logout))
        .routes(routes!(auth::account::profile))
        .routes(routes!(auth::account::change_password))
        .routes(routes!(auth::recovery::forgot_password))
        .routes(routes!(auth::recovery::reset_password))
        .routes(routes!(auth::recovery::send_email_verification))
        .routes(routes!(auth::recovery::verify_email))
        .routes(routes!(auth::admin::login))
        .routes(routes!(auth::admin::logout))
        .routes(routes!(auth::admin::profile))
        .routes(routes!(auth::admin::create_admin))
        .routes(routes!(auth::admin::update_password))
        .routes(routes!(auth::admin::update_status))
        .routes(routes!(auth::admin::user_login_token))
        .routes(routes!(auth::admin::update_user_status))
        .routes(routes!(auth::admin::me));

    router
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Use Cargo.toml metadata instead of the utoipa-axum crate info defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    OpenApiBuilder::new().info(info).build()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    if let Some(start) = author.find('<') {
        let name = author[..start].trim();
        let email = author[start + 1..].trim_end_matches('>').trim();
        let name = if name.is_empty() { None } else { Some(name) };
        let email = if email.is_empty() { None } else { Some(email) };
        (name, email)
    } else {
        let name = author.trim();
        (if name.is_empty() { None } else { Some(name) }, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_info_from_cargo() {
        let spec = openapi();
        assert_eq!(spec.info.title, env!("CARGO_PKG_NAME"));
        assert_eq!(spec.info.version, env!("CARGO_PKG_VERSION"));

        let contact = spec.info.contact;
        assert!(contact.is_some());
        if let Some(contact) = contact {
            assert_eq!(contact.name.as_deref(), Some("Team Donara"));
            assert_eq!(contact.email.as_deref(), Some("team@donara.dev"));
        }
    }

    #[test]
    fn openapi_tags_and_paths() {
        let spec = openapi();
        let tags = spec.tags.clone().unwrap_or_default();
        assert!(tags.iter().any(|tag| tag.name == "user-auth"));
        assert!(tags.iter().any(|tag| tag.name == "admin-auth"));
        assert!(spec.paths.paths.contains_key("/v1/user/send-login-code"));
        assert!(spec.paths.paths.contains_key("/v1/user/verify-login-code"));
        assert!(spec.paths.paths.contains_key("/v1/user/token"));
        assert!(spec.paths.paths.contains_key("/v1/admin/login"));
        assert!(
            spec.paths
                .paths
                .contains_key("/v1/admin/users/{user_id}/login-token")
        );
    }
}
