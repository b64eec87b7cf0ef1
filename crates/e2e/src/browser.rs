//! HTTP-level page driver.
//!
//! Plays the browser's part in the login flow without a real browser: a
//! cookie jar, manual redirect following with a current-URL register, and
//! just enough form handling to type credentials into the hosted login page.
//! Redirects are followed; the interstitial's meta refresh is not, so the
//! login flow keeps ownership of the replay navigation.

use std::collections::HashMap;

use async_trait::async_trait;
use regex_lite::Regex;
use reqwest::header;
use reqwest::redirect::Policy;
use url::Url;

use caregate_core::flow::PageDriver;
use caregate_core::{Error, Result};

const MAX_REDIRECTS: usize = 10;

pub struct HttpBrowser {
    http: reqwest::Client,
    current_url: String,
    status: u16,
    body: String,
    fields: HashMap<String, String>,
    visited: Vec<String>,
}

impl HttpBrowser {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .redirect(Policy::none())
            .build()?;
        Ok(Self {
            http,
            current_url: "about:blank".to_string(),
            status: 0,
            body: String::new(),
            fields: HashMap::new(),
            visited: Vec::new(),
        })
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// Every page URL this browser has landed on, in order.
    pub fn visited(&self) -> &[String] {
        &self.visited
    }

    /// Target of the current page's meta refresh, absolutized.
    pub fn refresh_target(&self) -> Option<String> {
        let target = extract_refresh_target(&self.body)?;
        resolve(&self.current_url, &target).ok()
    }

    /// Loads a page, following HTTP redirects up to [`MAX_REDIRECTS`] hops.
    ///
    /// The form body, when given, is posted on the first hop only; redirects
    /// are then followed with plain GETs, the way browsers treat 302.
    async fn load(&mut self, url: &str, form: Option<HashMap<String, String>>) -> Result<()> {
        let mut url = url.to_string();
        let mut form = form;
        for _ in 0..MAX_REDIRECTS {
            let resp = match form.take() {
                Some(data) => self.http.post(&url).form(&data).send().await?,
                None => self.http.get(&url).send().await?,
            };
            let status = resp.status();
            if status.is_redirection() {
                let location = resp
                    .headers()
                    .get(header::LOCATION)
                    .and_then(|value| value.to_str().ok())
                    .ok_or_else(|| Error::Driver(format!("{status} from {url} without a location")))?
                    .to_string();
                url = resolve(&url, &location)?;
                continue;
            }
            self.status = status.as_u16();
            self.current_url = url;
            self.body = resp.text().await?;
            self.visited.push(self.current_url.clone());
            return Ok(());
        }
        Err(Error::Driver(format!("redirect loop at {url}")))
    }

    fn form_action(&self) -> Result<String> {
        let action = extract_form_action(&self.body).ok_or_else(|| {
            Error::Driver(format!("no form to submit on {}", self.current_url))
        })?;
        resolve(&self.current_url, &action)
    }
}

#[async_trait]
impl PageDriver for HttpBrowser {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.fields.clear();
        self.load(url, None).await
    }

    fn current_url(&self) -> String {
        self.current_url.clone()
    }

    async fn fill(&mut self, field: &str, value: &str) -> Result<()> {
        let marker = format!("name=\"{field}\"");
        if !self.body.contains(&marker) {
            return Err(Error::Driver(format!(
                "no input named {field} on {}",
                self.current_url
            )));
        }
        self.fields.insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn submit(&mut self) -> Result<()> {
        let action = self.form_action()?;
        let fields = std::mem::take(&mut self.fields);
        self.load(&action, Some(fields)).await
    }

    fn error_text(&self) -> Option<String> {
        extract_error_text(&self.body)
    }
}

fn resolve(base: &str, href: &str) -> Result<String> {
    if href.starts_with("http://") || href.starts_with("https://") {
        return Ok(href.to_string());
    }
    let base = Url::parse(base).map_err(|e| Error::Driver(format!("bad base url {base}: {e}")))?;
    base.join(href)
        .map(|joined| joined.to_string())
        .map_err(|e| Error::Driver(format!("bad link {href}: {e}")))
}

fn extract_form_action(body: &str) -> Option<String> {
    let re = Regex::new(r#"<form[^>]*action="([^"]+)""#).ok()?;
    re.captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn extract_error_text(body: &str) -> Option<String> {
    let re = Regex::new(r#"class="alert alert-error">([^<]*)<"#).ok()?;
    re.captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

fn extract_refresh_target(body: &str) -> Option<String> {
    let re = Regex::new(r#"http-equiv="refresh" content="0;url=([^"]+)""#).ok()?;
    re.captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOGIN_FORM: &str = r#"<!DOCTYPE html>
<html><body>
<div class="alert alert-error">Invalid username or password.</div>
<form method="post" action="/auth/realms/caregate/login-actions/authenticate?session_code=abc">
<input type="text" name="username">
<input type="password" name="password">
<input type="submit" value="Log in">
</form>
</body></html>"#;

    #[test]
    fn form_action_is_extracted_from_the_login_page() {
        assert_eq!(
            extract_form_action(LOGIN_FORM).as_deref(),
            Some("/auth/realms/caregate/login-actions/authenticate?session_code=abc")
        );
        assert!(extract_form_action("<p>no form here</p>").is_none());
    }

    #[test]
    fn provider_error_text_is_extracted_verbatim() {
        assert_eq!(
            extract_error_text(LOGIN_FORM).as_deref(),
            Some("Invalid username or password.")
        );
        assert!(extract_error_text("<div class=\"alert\">other</div>").is_none());
    }

    #[test]
    fn refresh_target_comes_from_the_interstitial_meta_tag() {
        let page = "<meta http-equiv=\"refresh\" content=\"0;url=http://127.0.0.1:9000/patients\">";
        assert_eq!(
            extract_refresh_target(page).as_deref(),
            Some("http://127.0.0.1:9000/patients")
        );
        assert!(extract_refresh_target(LOGIN_FORM).is_none());
    }

    #[test]
    fn links_resolve_against_the_current_page() {
        assert_eq!(
            resolve("http://idp:9080/auth/realms/caregate/x", "/login-actions/authenticate").unwrap(),
            "http://idp:9080/login-actions/authenticate"
        );
        assert_eq!(
            resolve("http://idp:9080/x", "http://portal:9000/smart-launch-context").unwrap(),
            "http://portal:9000/smart-launch-context"
        );
    }

    #[tokio::test]
    async fn filling_an_absent_input_is_a_driver_error() {
        let mut browser = HttpBrowser::new().unwrap();
        browser.body = LOGIN_FORM.to_string();
        browser.current_url = "http://idp:9080/form".to_string();

        browser.fill("username", "admin").await.unwrap();
        let err = browser.fill("otp", "123456").await.unwrap_err();
        assert!(matches!(err, Error::Driver(_)));
    }
}
