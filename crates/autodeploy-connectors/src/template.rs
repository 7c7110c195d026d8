//! `${name}` message templates.

use std::collections::BTreeMap;

use regex::{Captures, Regex};

const PLACEHOLDER: &str = r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}";

pub const CHAT_TEMPLATE: &str = ":rocket: *Deployment notification*
*Project*: ${project_name}
*Environment*: ${environment}
*Status*: ${status}
*Version*: ${version}
*Time*: ${timestamp}
${details}";

pub const IM_TEMPLATE: &str = "[Deployment notification]
Project: ${project_name}
Environment: ${environment}
Status: ${status}
Version: ${version}
Time: ${timestamp}
${details}";

pub const EMAIL_SUBJECT: &str = "Deployment ${status}: ${project_name}";

pub const EMAIL_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<style>
body { font-family: Arial, sans-serif; }
.container { max-width: 600px; margin: 0 auto; padding: 20px; }
.header { background-color: #f8f9fa; padding: 10px; border-bottom: 1px solid #ddd; }
.success { color: #28a745; }
.failed, .rolled_back { color: #dc3545; }
.footer { color: #6c757d; font-size: 12px; margin-top: 30px; }
</style>
</head>
<body>
<div class="container">
<div class="header"><h2>Deployment notification</h2></div>
<p><strong>Project:</strong> ${project_name}</p>
<p><strong>Environment:</strong> ${environment}</p>
<p><strong>Status:</strong> <span class="${status}">${status}</span></p>
<p><strong>Version:</strong> ${version}</p>
<p><strong>Time:</strong> ${timestamp}</p>
<div><strong>Details:</strong><pre>${details}</pre></div>
<div class="footer"><p>Sent by the automated deployment system. Do not reply.</p></div>
</div>
</body>
</html>"#;

/// Substitute `${name}` placeholders. Unknown names stay verbatim.
pub fn render(template: &str, vars: &BTreeMap<&'static str, String>) -> String {
    let Ok(pattern) = Regex::new(PLACEHOLDER) else {
        return template.to_string();
    };
    pattern
        .replace_all(template, |caps: &Captures| match vars.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Escape the values for inclusion in HTML.
pub fn html_escaped(vars: &BTreeMap<&'static str, String>) -> BTreeMap<&'static str, String> {
    vars.iter()
        .map(|(k, v)| {
            let escaped = v
                .replace('&', "&amp;")
                .replace('<', "&lt;")
                .replace('>', "&gt;")
                .replace('"', "&quot;");
            (*k, escaped)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("project_name", "app".to_string()),
            ("status", "success".to_string()),
        ])
    }

    #[test]
    fn known_names_are_substituted() {
        assert_eq!(
            render("${project_name} is ${status}", &vars()),
            "app is success"
        );
    }

    #[test]
    fn unknown_names_stay_verbatim() {
        assert_eq!(
            render("${project_name} ${nope} $status", &vars()),
            "app ${nope} $status"
        );
    }

    #[test]
    fn html_values_are_escaped() {
        let vars = BTreeMap::from([("details", "<b>&</b>".to_string())]);
        assert_eq!(html_escaped(&vars)["details"], "&lt;b&gt;&amp;&lt;/b&gt;");
    }
}
