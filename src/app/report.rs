use std::fs;
use std::io;
use std::path::Path;

use chrono::Local;

use super::types::{ErrorKind, NotFoundPolicy, Outcome, OutcomeStatus};

/// Report bucket for one outcome. `Warning` exists so 404s can be surfaced
/// separately from hard failures when the policy asks for it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Bucket {
    Ok,
    Warning,
    Failed,
}

pub fn bucket(outcome: &Outcome, policy: NotFoundPolicy) -> Bucket {
    match outcome.status {
        OutcomeStatus::Success => Bucket::Ok,
        OutcomeStatus::Failed => {
            if outcome.error_kind == Some(ErrorKind::NotFound) && policy == NotFoundPolicy::Warn {
                Bucket::Warning
            } else {
                Bucket::Failed
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Summary {
    pub total: usize,
    pub success: usize,
    pub warning: usize,
    pub failed: usize,
}

pub fn summarize(outcomes: &[Outcome], policy: NotFoundPolicy) -> Summary {
    let mut summary = Summary {
        total: outcomes.len(),
        ..Summary::default()
    };
    for outcome in outcomes {
        match bucket(outcome, policy) {
            Bucket::Ok => summary.success += 1,
            Bucket::Warning => summary.warning += 1,
            Bucket::Failed => summary.failed += 1,
        }
    }
    summary
}

/// Writes a static, self-contained HTML report for the ordered outcome list.
pub fn write_html_report(
    outcomes: &[Outcome],
    policy: NotFoundPolicy,
    path: &Path,
    title: &str,
) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, render_report(outcomes, policy, title))
}

fn render_report(outcomes: &[Outcome], policy: NotFoundPolicy, title: &str) -> String {
    let summary = summarize(outcomes, policy);
    let generated = Local::now().format("%Y-%m-%d %H:%M:%S");

    let mut rows = String::new();
    for outcome in outcomes {
        let (badge_class, badge_label) = match bucket(outcome, policy) {
            Bucket::Ok => ("ok", "OK"),
            Bucket::Warning => ("warn", "WARNING"),
            Bucket::Failed => ("fail", "FAILED"),
        };
        let status = outcome
            .http_status
            .map(|code| code.to_string())
            .unwrap_or_else(|| "-".to_string());
        let error = match outcome.error_kind {
            Some(kind) => format!(
                "<code>{}</code> {}",
                kind.label(),
                escape(&outcome.error_message)
            ),
            None => String::new(),
        };
        let artifacts = outcome
            .artifact_paths
            .iter()
            .map(|p| format!("<a href=\"{0}\">{0}</a>", escape(p)))
            .collect::<Vec<_>>()
            .join("<br>");
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td>\
             <td><a href=\"{}\" target=\"_blank\">{}</a></td>\
             <td><span class=\"badge {}\">{}</span></td>\
             <td>{}</td><td>{}</td><td>{}</td></tr>\n",
            outcome.sequence_index,
            escape(&outcome.display_name),
            escape(&outcome.absolute_url),
            escape(&outcome.absolute_url),
            badge_class,
            badge_label,
            status,
            error,
            artifacts,
        ));
    }

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{title}</title>
<style>
body {{ font-family: -apple-system, "Segoe UI", Helvetica, Arial, sans-serif; margin: 2rem; color: #1f2430; }}
h1 {{ margin-bottom: 0.25rem; }}
.meta {{ color: #6b7280; margin-bottom: 1.5rem; }}
.cards {{ display: flex; gap: 1rem; margin-bottom: 1.5rem; }}
.card {{ border: 1px solid #e5e7eb; border-radius: 8px; padding: 0.75rem 1.25rem; min-width: 7rem; }}
.card .num {{ font-size: 1.6rem; font-weight: 700; }}
.card.ok .num {{ color: #16a34a; }}
.card.warn .num {{ color: #d97706; }}
.card.fail .num {{ color: #dc2626; }}
table {{ border-collapse: collapse; width: 100%; }}
th, td {{ text-align: left; padding: 0.5rem 0.75rem; border-bottom: 1px solid #e5e7eb; vertical-align: top; }}
th {{ background: #f9fafb; }}
.badge {{ padding: 0.1rem 0.5rem; border-radius: 999px; font-size: 0.8rem; font-weight: 600; }}
.badge.ok {{ background: #dcfce7; color: #166534; }}
.badge.warn {{ background: #fef3c7; color: #92400e; }}
.badge.fail {{ background: #fee2e2; color: #991b1b; }}
code {{ background: #f3f4f6; padding: 0.05rem 0.3rem; border-radius: 4px; }}
</style>
</head>
<body>
<h1>{title}</h1>
<div class="meta">generated {generated}</div>
<div class="cards">
<div class="card"><div class="num">{total}</div>total</div>
<div class="card ok"><div class="num">{success}</div>success</div>
<div class="card warn"><div class="num">{warning}</div>warnings</div>
<div class="card fail"><div class="num">{failed}</div>failed</div>
</div>
<table>
<thead><tr><th>#</th><th>name</th><th>url</th><th>result</th><th>http</th><th>error</th><th>artifacts</th></tr></thead>
<tbody>
{rows}</tbody>
</table>
</body>
</html>
"#,
        title = escape(title),
        generated = generated,
        total = summary.total,
        success = summary.success,
        warning = summary.warning,
        failed = summary.failed,
        rows = rows,
    )
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::types::WorkItem;

    fn item(idx: usize) -> WorkItem {
        WorkItem {
            sequence_index: idx,
            identifier: format!("id-{idx}"),
            target_url_fragment: format!("/p/{idx}"),
            display_name: format!("item <{idx}>"),
        }
    }

    fn sample_outcomes() -> Vec<Outcome> {
        vec![
            Outcome::success(&item(1), "https://h.test/p/1", 200, vec!["shots/a.png".into()]),
            Outcome::failed(
                &item(2),
                "https://h.test/p/2",
                Some(404),
                ErrorKind::NotFound,
                "HTTP 404",
            ),
            Outcome::failed(
                &item(3),
                "https://h.test/p/3",
                Some(503),
                ErrorKind::ServerError,
                "HTTP 503",
            ),
        ]
    }

    #[test]
    fn not_found_bucket_follows_policy() {
        let outcomes = sample_outcomes();
        assert_eq!(bucket(&outcomes[1], NotFoundPolicy::Warn), Bucket::Warning);
        assert_eq!(bucket(&outcomes[1], NotFoundPolicy::Fail), Bucket::Failed);
        assert_eq!(bucket(&outcomes[2], NotFoundPolicy::Warn), Bucket::Failed);
    }

    #[test]
    fn summary_counts_by_bucket() {
        let summary = summarize(&sample_outcomes(), NotFoundPolicy::Warn);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.success, 1);
        assert_eq!(summary.warning, 1);
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn report_is_written_and_escaped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("report.html");
        write_html_report(
            &sample_outcomes(),
            NotFoundPolicy::Warn,
            &path,
            "Batch <Report>",
        )
        .expect("report written");

        let html = std::fs::read_to_string(&path).expect("read report");
        assert!(html.contains("Batch &lt;Report&gt;"));
        assert!(html.contains("item &lt;1&gt;"));
        assert!(html.contains("shots/a.png"));
        assert!(html.contains("not_found"));
        assert!(!html.contains("item <1>"));
    }
}
