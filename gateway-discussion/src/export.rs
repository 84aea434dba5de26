//! Discussion export renderers (md/json/html), supplemented from
//! `original_source/lib/gateway/discussion_exporters.py` — the spec names
//! the endpoint but not the renderers.

use gateway_core::model::{DiscussionMessage, DiscussionSession};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Markdown,
    Json,
    Html,
}

impl ExportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "md" => Some(ExportFormat::Markdown),
            "json" => Some(ExportFormat::Json),
            "html" => Some(ExportFormat::Html),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct ExportPayload<'a> {
    session: &'a DiscussionSession,
    messages: &'a [DiscussionMessage],
}

pub fn render(session: &DiscussionSession, messages: &[DiscussionMessage], format: ExportFormat) -> String {
    match format {
        ExportFormat::Json => {
            serde_json::to_string_pretty(&ExportPayload { session, messages }).unwrap_or_default()
        }
        ExportFormat::Markdown => render_markdown(session, messages),
        ExportFormat::Html => render_html(session, messages),
    }
}

fn render_markdown(session: &DiscussionSession, messages: &[DiscussionMessage]) -> String {
    let mut out = format!("# Discussion: {}\n\n", session.topic);
    for round in 1..=3 {
        let round_messages: Vec<_> = messages.iter().filter(|m| m.round == round).collect();
        if round_messages.is_empty() {
            continue;
        }
        out.push_str(&format!("## Round {round}\n\n"));
        for m in round_messages {
            let who = m.provider.as_deref().unwrap_or("system");
            out.push_str(&format!("**{who}**: {}\n\n", m.content));
        }
    }
    if let Some(summary) = messages.iter().find(|m| m.round == 0) {
        out.push_str(&format!("## Summary\n\n{}\n", summary.content));
    }
    out
}

fn render_html(session: &DiscussionSession, messages: &[DiscussionMessage]) -> String {
    let mut out = format!("<h1>Discussion: {}</h1>\n", html_escape(&session.topic));
    for round in 1..=3 {
        let round_messages: Vec<_> = messages.iter().filter(|m| m.round == round).collect();
        if round_messages.is_empty() {
            continue;
        }
        out.push_str(&format!("<h2>Round {round}</h2>\n<ul>\n"));
        for m in round_messages {
            let who = m.provider.as_deref().unwrap_or("system");
            out.push_str(&format!(
                "<li><strong>{}</strong>: {}</li>\n",
                html_escape(who),
                html_escape(&m.content)
            ));
        }
        out.push_str("</ul>\n");
    }
    if let Some(summary) = messages.iter().find(|m| m.round == 0) {
        out.push_str(&format!("<h2>Summary</h2>\n<p>{}</p>\n", html_escape(&summary.content)));
    }
    out
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gateway_core::model::{DiscussionStatus, MessageRole, MessageStatus};
    use uuid::Uuid;

    fn sample() -> (DiscussionSession, Vec<DiscussionMessage>) {
        let session_id = Uuid::new_v4();
        let session = DiscussionSession {
            id: session_id,
            topic: "Rust vs Go".into(),
            providers: vec!["a".into(), "b".into()],
            status: DiscussionStatus::Completed,
            parent_session_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let messages = vec![DiscussionMessage {
            id: Uuid::new_v4(),
            session_id,
            round: 1,
            provider: Some("a".into()),
            role: MessageRole::Provider,
            content: "Rust wins on safety".into(),
            status: MessageStatus::Delivered,
            created_at: Utc::now(),
        }];
        (session, messages)
    }

    #[test]
    fn markdown_includes_topic_and_round() {
        let (session, messages) = sample();
        let out = render(&session, &messages, ExportFormat::Markdown);
        assert!(out.contains("Rust vs Go"));
        assert!(out.contains("Round 1"));
    }

    #[test]
    fn html_escapes_content() {
        let (mut session, messages) = sample();
        session.topic = "<script>".into();
        let out = render(&session, &messages, ExportFormat::Html);
        assert!(!out.contains("<script>"));
        assert!(out.contains("&lt;script&gt;"));
    }

    #[test]
    fn format_from_str_rejects_unknown() {
        assert!(ExportFormat::from_str("yaml").is_none());
        assert_eq!(ExportFormat::from_str("md"), Some(ExportFormat::Markdown));
    }
}
