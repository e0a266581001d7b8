//! Server-rendered HTML documents. Interactive pieces live in
//! `static/studio.js`; layout HTML comes from `layout_renderer`.

use std::fmt::Write;

use crate::auth::AuthUser;
use crate::chat_assistant::{ChatMessage, Sender};
use crate::layout_renderer::{render_preview, render_print_canvas, RenderPlan};
use crate::package_catalog::catalog;

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn document(title: &str, body_class: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
<link rel="stylesheet" href="/static/studio.css">
<link rel="stylesheet" href="/static/print.css">
</head>
<body class="{body_class}">
{body}
<script src="/static/studio.js"></script>
</body>
</html>
"#,
        title = escape_html(title),
        body_class = body_class,
        body = body
    )
}

fn chat_widget(messages: &[ChatMessage]) -> String {
    let mut html = String::from(
        r#"<aside id="chat" class="chat no-print"><header>PortraCV Assistant</header><ol id="chat-log">"#,
    );
    for message in messages {
        let sender = match message.sender {
            Sender::User => "user",
            Sender::Bot => "bot",
        };
        let _ = write!(
            html,
            r#"<li class="chat-message {}{}" data-id="{}">{}</li>"#,
            sender,
            if message.is_error { " error" } else { "" },
            message.id,
            escape_html(&message.text)
        );
    }
    html.push_str(
        r#"</ol><form id="chat-form"><input id="chat-input" name="message" autocomplete="off" placeholder="Ask about packages or printing"><button type="submit">Send</button></form></aside>"#,
    );
    html
}

/// Main studio: package picker, upload and crop controls, background
/// removal, the preview and the (screen-hidden) print canvas.
pub fn studio_page(plan: &RenderPlan, user: &AuthUser, chat: &[ChatMessage]) -> String {
    let mut options = String::new();
    for package in catalog() {
        let _ = write!(
            options,
            r#"<option value="{}"{}>{} ({} photos)</option>"#,
            package.id,
            if package.id == plan.package_id {
                " selected"
            } else {
                ""
            },
            escape_html(package.name),
            package.total_cells()
        );
    }

    let email = user.email.as_deref().unwrap_or("signed in");
    let body = format!(
        r##"<header class="topbar no-print">
<h1>PortraCV</h1>
<span class="user">{email}</span>
<button id="sign-out" type="button">Sign out</button>
</header>
<main class="studio no-print">
<section class="controls">
<label>Package <select id="package-select">{options}</select></label>
<form id="upload-form"><input id="upload-input" type="file" name="file" accept="image/*"></form>
<div id="crop-tool" class="crop-tool" hidden>
<div class="crop-frame"><img id="crop-source" alt=""></div>
<label>Zoom <input id="crop-zoom" type="range" min="1" max="4" step="0.01" value="1"></label>
<button id="crop-confirm" type="button">Use crop</button>
<button id="crop-cancel" type="button">Cancel</button>
</div>
<div class="background">
<label>Background <input id="background-color" type="color" value="#ffffff"></label>
<label><input id="background-transparent" type="checkbox"> Transparent</label>
<button id="background-remove" type="button">Remove background</button>
<button id="background-undo" type="button">Undo</button>
<span id="background-status" role="status"></span>
</div>
<button id="print" type="button">Print</button>
<a href="/api/sheet.png" download>Save as image</a>
</section>
<section id="preview">{preview}</section>
</main>
{chat}
{print_canvas}"##,
        email = escape_html(email),
        options = options,
        preview = render_preview(plan),
        chat = chat_widget(chat),
        print_canvas = render_print_canvas(plan),
    );

    document("PortraCV Studio", "page-studio", &body)
}

pub fn sign_in_page(chat: &[ChatMessage]) -> String {
    let body = format!(
        r#"<main class="auth-card no-print">
<h1>PortraCV</h1>
<form id="auth-form">
<input name="email" type="email" placeholder="Email" required>
<input name="password" type="password" placeholder="Password" required>
<button type="submit" data-action="signin">Sign in</button>
<button type="submit" data-action="signup">Create account</button>
<button type="button" id="forgot-password">Forgot password?</button>
</form>
<p id="auth-message" role="alert"></p>
</main>
{chat}"#,
        chat = chat_widget(chat)
    );
    document("Sign in - PortraCV", "page-signin", &body)
}

/// Shown for the emailed reset link and whenever recovery mode is active.
/// The script forwards the link's tokens before the form is used.
pub fn update_password_page() -> String {
    let body = r#"<main class="auth-card no-print">
<h1>Choose a new password</h1>
<form id="update-password-form">
<input name="password" type="password" minlength="6" placeholder="New password" required>
<button type="submit">Update password</button>
</form>
<p id="auth-message" role="alert"></p>
</main>"#;
    document("Update password - PortraCV", "page-update-password", body)
}

/// Print-only document: the canvas plus an automatic print dialog.
pub fn print_page(plan: &RenderPlan) -> String {
    let body = format!(
        r#"{canvas}
<script>window.addEventListener("load", function () {{ window.print(); }});</script>"#,
        canvas = render_print_canvas(plan)
    );
    document("Print - PortraCV", "page-print", &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package_catalog::find_package;

    fn user() -> AuthUser {
        AuthUser {
            id: "u1".to_string(),
            email: Some("<shop>@example.com".to_string()),
            created_at: None,
            last_sign_in_at: None,
        }
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<a href="x">&'"#),
            "&lt;a href=&quot;x&quot;&gt;&amp;&#39;"
        );
    }

    #[test]
    fn test_studio_page_carries_both_canvases() {
        let plan = RenderPlan::build(find_package("passport-mix").unwrap(), None);
        let html = studio_page(&plan, &user(), &[]);

        assert!(html.contains(r#"id="preview-canvas""#));
        assert!(html.contains(r#"id="print-canvas""#));
        assert!(html.contains(r#"<option value="passport-mix" selected>"#));
        assert!(html.contains("&lt;shop&gt;@example.com"));
        assert!(html.contains(r##"id="background-color" type="color" value="#ffffff""##));
        assert!(html.contains(r#"id="background-transparent""#));
    }

    #[test]
    fn test_print_page_triggers_print() {
        let plan = RenderPlan::build(find_package("max-2x2").unwrap(), Some("abc"));
        let html = print_page(&plan);

        assert!(html.contains("window.print()"));
        assert!(html.contains("/static/print.css"));
        assert_eq!(html.matches("<img ").count(), 8);
    }

    #[test]
    fn test_chat_messages_are_escaped() {
        let messages = vec![ChatMessage {
            id: 1,
            text: "<b>hi</b>".to_string(),
            sender: Sender::Bot,
            is_error: true,
        }];
        let html = sign_in_page(&messages);
        assert!(html.contains(r#"class="chat-message bot error" data-id="1">&lt;b&gt;hi&lt;/b&gt;"#));
    }
}
