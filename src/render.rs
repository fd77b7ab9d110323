//! Notification text rendering (Telegram HTML parse mode)

use crate::github::{Issue, Release, StarredRepo};
use crate::store::ItemKey;

const MAX_BODY_LEN: usize = 300;

/// Escape user-supplied text for Telegram's HTML parse mode
fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_len).collect();
        format!("{}...", cut)
    }
}

/// Text for a new-release notification
pub fn release_notification(owner: &str, repo: &str, release: &Release) -> String {
    let date_line = release
        .published_at
        .map(|dt| format!("📅 Published: {}\n", dt.format("%Y-%m-%d")))
        .unwrap_or_default();

    format!(
        "🚀 <b>New Release Available!</b>\n\n\
         📦 Repository: <b>{}/{}</b>\n\
         🏷️ Version: <b>{}</b>\n\
         {}\
         <a href=\"{}\">View Release</a>",
        escape(owner),
        escape(repo),
        escape(&release.tag_name),
        date_line,
        release.html_url,
    )
}

/// Text for a newly opened issue notification
pub fn issue_notification(repo: &str, issue: &Issue) -> String {
    let body = issue.body.as_deref().unwrap_or("No description provided.");

    format!(
        "🪲 <a href=\"{}\">{}</a> opened issue <code>{}#{}</code>\n\n\
         <blockquote expandable>Title: {}\n{}</blockquote>\n\n\
         🔗 <a href=\"{}\">View Issue</a>\n\
         #openedissue",
        issue.author_url,
        escape(&issue.author),
        escape(repo),
        issue.number,
        escape(&issue.title),
        escape(&truncate(body, MAX_BODY_LEN)),
        issue.html_url,
    )
}

/// Text for a newly starred repository notification
pub fn starred_notification(account: &str, starred: &StarredRepo) -> String {
    let description = starred
        .description
        .as_deref()
        .map(|d| format!("\n📝 {}", escape(&truncate(d, MAX_BODY_LEN))))
        .unwrap_or_default();

    format!(
        "⭐ <b>@{}</b> starred a repository\n\n\
         📦 <a href=\"{}\">{}</a>{}",
        escape(account),
        starred.html_url,
        escape(&starred.full_name),
        description,
    )
}

/// One-time notice sent before an item is removed after repeated not-found
/// results
pub fn tracking_stopped_notice(key: &ItemKey) -> String {
    format!(
        "🛑 <b>Tracking Stopped</b>\n\n\
         <b>{}</b> could not be found after repeated checks and has been \
         removed from tracking. It may have been deleted, renamed, or made \
         private.",
        escape(&key.label()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_notification_includes_tag_and_url() {
        let release = Release {
            id: "1".into(),
            tag_name: "v1.2.3".into(),
            name: Some("Big release".into()),
            html_url: "https://github.com/o/r/releases/tag/v1.2.3".into(),
            published_at: None,
        };

        let text = release_notification("o", "r", &release);
        assert!(text.contains("v1.2.3"));
        assert!(text.contains("o/r"));
        assert!(text.contains("View Release"));
        // No date line when published_at is missing
        assert!(!text.contains("Published"));
    }

    #[test]
    fn test_issue_notification_truncates_body() {
        let issue = Issue {
            id: "1".into(),
            number: 42,
            title: "Crash on startup".into(),
            author: "reporter".into(),
            author_url: "https://github.com/reporter".into(),
            html_url: "https://github.com/o/r/issues/42".into(),
            body: Some("x".repeat(500)),
        };

        let text = issue_notification("r", &issue);
        assert!(text.contains("r#42"));
        assert!(text.contains(&format!("{}...", "x".repeat(300))));
        assert!(!text.contains(&"x".repeat(301)));
    }

    #[test]
    fn test_html_escaping() {
        let issue = Issue {
            id: "1".into(),
            number: 1,
            title: "<script> & friends".into(),
            author: "a".into(),
            author_url: "https://github.com/a".into(),
            html_url: "https://github.com/o/r/issues/1".into(),
            body: None,
        };

        let text = issue_notification("r", &issue);
        assert!(text.contains("&lt;script&gt; &amp; friends"));
        assert!(!text.contains("<script>"));
    }

    #[test]
    fn test_tracking_stopped_notice_names_the_item() {
        let key = ItemKey::Stars {
            account: "octocat".into(),
        };
        let text = tracking_stopped_notice(&key);
        assert!(text.contains("stars of @octocat"));
        assert!(text.contains("Tracking Stopped"));
    }
}
