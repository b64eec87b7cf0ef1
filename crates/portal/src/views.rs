//! Server-rendered pages.
//!
//! Page content renders inside an error boundary; the surrounding layout
//! (header, ribbon, footer) stays up even when a content view fails. The
//! boundaries for fixed pages are built once at startup through
//! [`PageRegistry`], which also catches misconfigured routes before the
//! server takes traffic.

use std::sync::Arc;

use serde::Deserialize;

use caregate_core::boundary::RoutedBoundary;
use caregate_core::profile::{ProfileInfo, ProfileStore};
use caregate_core::Result;

use crate::session::PortalSession;

/// Patient record as the clinical gateway serves it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub birth_date: String,
    #[serde(default)]
    pub conditions: Vec<String>,
}

/// Wraps rendered content in the portal chrome.
pub fn layout(
    title: &str,
    profile: &ProfileInfo,
    session: Option<&PortalSession>,
    content: &str,
) -> String {
    let ribbon = if !profile.in_production && !profile.ribbon_env.is_empty() {
        format!(
            "<div class=\"ribbon {env}\"><span>{env}</span></div>\n",
            env = profile.ribbon_env
        )
    } else {
        String::new()
    };
    let swagger_link = if profile.is_swagger_enabled {
        "<a href=\"/swagger-ui\">API</a>\n"
    } else {
        ""
    };
    let account = match session {
        Some(session) => format!(
            "<span class=\"signed-in\">Signed in as {}</span> <a href=\"/logout\">Sign out</a>",
            session.username
        ),
        None => "<a href=\"/patients\" class=\"sign-in\">Sign in</a>".to_string(),
    };
    format!(
        "<!DOCTYPE html>\n\
         <html>\n\
         <head><title>{title} - CareGate</title></head>\n\
         <body>\n\
         {ribbon}\
         <header>\n\
         <nav>\n\
         <a href=\"/\">CareGate</a>\n\
         <a href=\"/patients\">Patients</a>\n\
         {swagger_link}\
         {account}\n\
         </nav>\n\
         </header>\n\
         <main>\n\
         {content}\n\
         </main>\n\
         <footer>CareGate clinical portal</footer>\n\
         </body>\n\
         </html>\n"
    )
}

pub fn home_html(profile: &ProfileInfo) -> String {
    let mode = if profile.in_production {
        String::new()
    } else {
        format!(
            "<p class=\"deploy-note\">This is a {} deployment.</p>\n",
            profile.ribbon_env
        )
    };
    format!(
        "<h1>Welcome to CareGate</h1>\n\
         <p>Clinical data for signed-in staff. Open the patient list to begin.</p>\n\
         {mode}"
    )
}

pub fn patients_html(patients: &[Patient]) -> String {
    let mut rows = String::new();
    for patient in patients {
        rows.push_str(&format!(
            "<tr><td><a href=\"/patients/{id}\">{id}</a></td><td>{name}</td><td>{dob}</td></tr>\n",
            id = patient.id,
            name = patient.name,
            dob = patient.birth_date,
        ));
    }
    format!(
        "<h1>Patients</h1>\n\
         <table class=\"patients\">\n\
         <thead><tr><th>ID</th><th>Name</th><th>Born</th></tr></thead>\n\
         <tbody>\n{rows}</tbody>\n\
         </table>\n"
    )
}

pub fn patient_detail_html(patient: &Patient, session: &PortalSession) -> String {
    let launch_note = match session.launch.get("patient") {
        Some(launched) if launched == &patient.id => {
            "<p class=\"launch-context\">Opened from the launching record system.</p>\n"
        }
        _ => "",
    };
    let conditions = if patient.conditions.is_empty() {
        "<p>No recorded conditions.</p>\n".to_string()
    } else {
        let items: String = patient
            .conditions
            .iter()
            .map(|c| format!("<li>{c}</li>\n"))
            .collect();
        format!("<ul class=\"conditions\">\n{items}</ul>\n")
    };
    format!(
        "<h1>{name}</h1>\n\
         <p>ID {id}, born {dob}</p>\n\
         {launch_note}\
         <h2>Conditions</h2>\n\
         {conditions}",
        name = patient.name,
        id = patient.id,
        dob = patient.birth_date,
    )
}

/// Interstitial served at the entry point once the session is set. Browsers
/// follow the refresh; anything else can use the link.
pub fn entry_page(return_url: &str) -> String {
    let href = return_url.replace('"', "%22");
    format!(
        "<!DOCTYPE html>\n\
         <html>\n\
         <head>\n\
         <meta http-equiv=\"refresh\" content=\"0;url={href}\">\n\
         <title>Signing you in - CareGate</title>\n\
         </head>\n\
         <body>\n\
         <p>Signing you in. <a href=\"{href}\">Continue</a></p>\n\
         </body>\n\
         </html>\n"
    )
}

pub fn error_html(message: &str) -> String {
    format!("<div class=\"alert alert-error\">{message}</div>\n")
}

/// Boundaries for the fixed pages, validated at startup.
///
/// Pages whose content comes from the gateway (the patient views) get a
/// fresh [`caregate_core::boundary::ErrorBoundary`] per request instead,
/// built around the fetched data.
pub struct PageRegistry {
    pub home: RoutedBoundary,
    /// Failure-injection page, present only in test mode.
    pub boom: Option<RoutedBoundary>,
}

impl PageRegistry {
    pub fn build(store: Arc<ProfileStore>, test_mode: bool) -> Result<Self> {
        let home = RoutedBoundary::builder("/")
            .component(move || {
                let store = store.clone();
                move || home_html(&store.snapshot())
            })
            .build()?;

        let boom = if test_mode {
            Some(
                RoutedBoundary::builder("/debug/boom")
                    .component(|| || -> String { panic!("intentional render failure") })
                    .build()?,
            )
        } else {
            None
        };

        Ok(Self { home, boom })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caregate_core::profile::ProfileAction;
    use caregate_core::FALLBACK_MARKUP;
    use std::collections::HashMap;

    fn dev_profile() -> ProfileInfo {
        ProfileInfo {
            ribbon_env: "dev".to_string(),
            in_production: false,
            is_swagger_enabled: true,
            active_profiles: vec!["dev".to_string(), "swagger".to_string()],
        }
    }

    fn patients() -> Vec<Patient> {
        vec![
            Patient {
                id: "P-1234".to_string(),
                name: "Amy Shaw".to_string(),
                birth_date: "1987-02-20".to_string(),
                conditions: vec!["Hypertension".to_string()],
            },
            Patient {
                id: "P-0042".to_string(),
                name: "Luis Ortega".to_string(),
                birth_date: "1954-11-08".to_string(),
                conditions: Vec::new(),
            },
        ]
    }

    fn session() -> PortalSession {
        let mut launch = HashMap::new();
        launch.insert("patient".to_string(), "P-1234".to_string());
        PortalSession {
            token: "t".to_string(),
            username: "admin".to_string(),
            roles: vec!["ROLE_ADMIN".to_string()],
            launch,
            created_at: 0,
            expires_at: i64::MAX,
        }
    }

    #[test]
    fn dev_layout_shows_ribbon_and_api_link() {
        let page = layout("Home", &dev_profile(), None, "<p>x</p>");
        assert!(page.contains("class=\"ribbon dev\""));
        assert!(page.contains("href=\"/swagger-ui\""));
        assert!(page.contains("Sign in"));
    }

    #[test]
    fn prod_layout_hides_dev_chrome() {
        let page = layout("Home", &ProfileInfo::default(), Some(&session()), "<p>x</p>");
        assert!(!page.contains("class=\"ribbon"));
        assert!(!page.contains("/swagger-ui"));
        assert!(page.contains("Signed in as admin"));
    }

    #[test]
    fn patient_detail_marks_the_launched_record() {
        let patients = patients();
        let launched = patients.iter().find(|p| p.id == "P-1234").unwrap();
        let other = patients.iter().find(|p| p.id == "P-0042").unwrap();

        let page = patient_detail_html(launched, &session());
        assert!(page.contains("launch-context"));

        let page = patient_detail_html(other, &session());
        assert!(!page.contains("launch-context"));
    }

    #[test]
    fn patient_records_parse_from_the_gateway_wire_shape() {
        let parsed: Vec<Patient> = serde_json::from_str(
            r#"[{"id": "P-1234", "name": "Amy Shaw", "birthDate": "1987-02-20",
                 "conditions": ["Hypertension"]},
                {"id": "P-0042", "name": "Luis Ortega"}]"#,
        )
        .unwrap();
        assert_eq!(parsed[0].birth_date, "1987-02-20");
        assert_eq!(parsed[0].conditions, vec!["Hypertension"]);
        // Fields the gateway omits fall back to empty.
        assert_eq!(parsed[1].birth_date, "");
        assert!(parsed[1].conditions.is_empty());
    }

    #[test]
    fn home_page_renders_the_store_snapshot() {
        let store = Arc::new(ProfileStore::new());
        let registry = PageRegistry::build(store.clone(), true).unwrap();

        let home = registry.home.mount().render();
        assert!(home.contains("Welcome to CareGate"));
        assert!(!home.contains("deploy-note"));

        // Once the profile loads, later mounts reflect it.
        store.apply(&ProfileAction::Loaded(serde_json::from_str(
            r#"{"deploy-mode": {"name": "dev"}, "activeProfiles": ["dev"]}"#,
        ).unwrap()));
        let home = registry.home.mount().render();
        assert!(home.contains("This is a dev deployment."));
    }

    #[test]
    fn boom_page_is_contained_by_its_boundary() {
        let registry = PageRegistry::build(Arc::new(ProfileStore::new()), true).unwrap();
        let boom = registry.boom.as_ref().unwrap();
        assert_eq!(boom.mount().render(), FALLBACK_MARKUP);
        // A fresh mount is also fresh containment, not a poisoned page.
        assert_eq!(boom.mount().render(), FALLBACK_MARKUP);
    }

    #[test]
    fn boom_page_is_absent_outside_test_mode() {
        let registry = PageRegistry::build(Arc::new(ProfileStore::new()), false).unwrap();
        assert!(registry.boom.is_none());
    }

    #[test]
    fn entry_page_refreshes_to_the_return_url() {
        let page = entry_page("http://127.0.0.1:9000/patients/P-1234");
        assert!(page.contains("0;url=http://127.0.0.1:9000/patients/P-1234"));
        assert!(page.contains("<a href=\"http://127.0.0.1:9000/patients/P-1234\""));
    }
}
