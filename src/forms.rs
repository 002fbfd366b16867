//! The credential-collection form as a capability.
//!
//! The protocol endpoints never build markup themselves; they hand a render
//! request to a `FormRenderer` and read submitted fields back out of the POST
//! body. Swapping the rendering technology touches nothing in the flow logic.

use crate::scopes::ScopeSet;

/// A user-correctable problem to surface on the form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormNotice {
    /// The submitted key was malformed or inactive.
    CredentialRejected(String),
    /// The key is valid but lacks permissions; lists the missing ones.
    PermissionShortfall(ScopeSet),
    /// The upstream check could not complete; the user may retry as-is.
    UpstreamUnavailable,
}

/// Everything the form needs to render one credential prompt.
#[derive(Debug, Clone)]
pub struct FormRequest {
    /// Internal flow id, carried as the hidden correlation field.
    pub flow_id: String,
    /// Client display identifier for the consent copy.
    pub client_id: String,
    /// Scopes the client is asking for.
    pub scope: ScopeSet,
    /// Optional notice from a previous failed submission.
    pub notice: Option<FormNotice>,
}

/// External rendering collaborator: render request in, HTML out.
pub trait FormRenderer: Send + Sync {
    /// The credential prompt, including the hidden `flow` field and the
    /// `action` buttons ("authorize" / "cancel").
    fn render_form(&self, request: &FormRequest) -> String;

    /// Terminal page shown when the flow is gone and must be restarted.
    fn render_expired(&self) -> String;
}

/// Minimal built-in renderer. Plain HTML, no assets.
#[derive(Debug, Clone, Default)]
pub struct BasicFormRenderer;

impl FormRenderer for BasicFormRenderer {
    fn render_form(&self, request: &FormRequest) -> String {
        let notice = match &request.notice {
            Some(FormNotice::CredentialRejected(reason)) => {
                format!(r#"<p class="error">Key rejected: {}</p>"#, escape(reason))
            }
            Some(FormNotice::PermissionShortfall(missing)) => format!(
                r#"<p class="error">This key is valid but is missing permissions: <code>{}</code>. Grant them and submit again.</p>"#,
                escape(&missing.to_string())
            ),
            Some(FormNotice::UpstreamUnavailable) => {
                r#"<p class="error">Could not reach the upstream service. Please try again.</p>"#
                    .to_string()
            }
            None => String::new(),
        };

        format!(
            r#"<!DOCTYPE html>
<html>
<head><title>Authorize {client}</title></head>
<body>
  <h1>Authorize access</h1>
  <p><code>{client}</code> is requesting: <code>{scope}</code></p>
  {notice}
  <form method="post" action="/oauth/authorize">
    <input type="hidden" name="flow" value="{flow}">
    <label>Upstream API key
      <input type="password" name="credential" autocomplete="off" required>
    </label>
    <button type="submit" name="action" value="authorize">Authorize</button>
    <button type="submit" name="action" value="cancel">Cancel</button>
  </form>
</body>
</html>"#,
            client = escape(&request.client_id),
            scope = escape(&request.scope.to_string()),
            notice = notice,
            flow = escape(&request.flow_id),
        )
    }

    fn render_expired(&self) -> String {
        r#"<!DOCTYPE html>
<html>
<head><title>Request expired</title></head>
<body>
  <h1>Authorization request expired</h1>
  <p>This authorization request is no longer valid. Return to the
  application and start the connection again.</p>
</body>
</html>"#
            .to_string()
    }
}

/// Minimal HTML escaping for interpolated values.
fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
