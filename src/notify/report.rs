use std::fmt::Write as _;

use crate::core::types::Step;

/// A unit that still failed after its scheduled retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedUnit {
    pub parent_domain: String,
    pub hostnames: Vec<String>,
    pub step: Step,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMessage {
    pub subject: String,
    pub text: String,
    pub html: String,
}

pub fn html_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

/// Aggregated report for one pass: one line (and table row) per unit.
pub fn failure_report(failures: &[FailedUnit]) -> AlertMessage {
    let subject = format!("[autossl] {} certificate task(s) failed", failures.len());

    let mut text = String::from("The following certificate tasks failed after retry:\n\n");
    let mut rows = String::new();
    for failure in failures {
        let hostnames = if failure.hostnames.is_empty() {
            "-".to_string()
        } else {
            failure.hostnames.join(", ")
        };
        let _ = writeln!(
            text,
            "- {} [{}] at {}: {}",
            failure.parent_domain, hostnames, failure.step, failure.error
        );
        let _ = write!(
            rows,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            html_escape(&failure.parent_domain),
            html_escape(&hostnames),
            failure.step,
            html_escape(&failure.error)
        );
    }

    let html = format!(
        "<p>The following certificate tasks failed after retry:</p>\
         <table border=\"1\" cellpadding=\"4\" cellspacing=\"0\">\
         <tr><th>Parent domain</th><th>Hostnames</th><th>Step</th><th>Error</th></tr>\
         {rows}</table>"
    );

    AlertMessage {
        subject,
        text,
        html,
    }
}

/// Alert sent when the hostname list cannot be built and the pass is skipped.
pub fn grouping_failure(error: &str) -> AlertMessage {
    AlertMessage {
        subject: "[autossl] reconciliation pass skipped".to_string(),
        text: format!("Failed to build certificate groups, the pass was skipped:\n\n{error}\n"),
        html: format!(
            "<p>Failed to build certificate groups, the pass was skipped:</p><pre>{}</pre>",
            html_escape(error)
        ),
    }
}
