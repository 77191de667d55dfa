use crate::session::{AnalysisResult, SessionView};

const INSTRUCTIONS: &str = r#"
<section class="help">
  <p><strong>How to use:</strong></p>
  <ol>
    <li>Enter your Google API key</li>
    <li>Upload a receipt image (JPG/PNG)</li>
    <li>Type your question about the receipt</li>
    <li>Click "Analyze Receipt"</li>
  </ol>
  <p><strong>Example questions:</strong></p>
  <ul>
    <li>What is the total amount?</li>
    <li>What is the purchase date?</li>
    <li>List all items purchased</li>
    <li>What is the merchant's address?</li>
  </ul>
</section>
"#;

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Renders the whole page for one session view.
pub fn render(view: &SessionView) -> String {
    let mut alerts = String::new();
    if let Some(warning) = &view.warning {
        alerts.push_str(&format!(
            "<div class=\"warning\">{}</div>\n",
            escape(warning)
        ));
    }
    // a missing-key notice repeats the standing warning
    if let Some(notice) = view
        .notice
        .as_ref()
        .filter(|n| view.warning.as_ref() != Some(*n))
    {
        alerts.push_str(&format!(
            "<div class=\"warning\">{}</div>\n",
            escape(notice)
        ));
    }

    let result = match &view.result {
        Some(AnalysisResult::Success(text)) => format!(
            "<h2>Analysis Result:</h2>\n<pre class=\"success\">{}</pre>\n",
            escape(text)
        ),
        Some(AnalysisResult::Failure(message)) => {
            format!("<div class=\"error\">{}</div>\n", escape(message))
        }
        None => String::new(),
    };

    let credential_hint = if view.has_credential {
        "An API key is set for this session. Leave blank to keep it."
    } else {
        "Your key stays in memory for this session only."
    };

    let image_hint = match &view.image {
        Some(name) => format!("<small>Current image: {}</small>", escape(name)),
        None => String::new(),
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Receipt Analyzer</title>
<style>
body {{ max-width: 880px; margin: 0 auto; padding: 24px; font-family: sans-serif; }}
label {{ display: block; font-weight: 600; margin: 16px 0 8px; }}
.warning {{ background: #fff8e1; padding: 12px; border-radius: 8px; margin: 8px 0; }}
.error {{ background: #fdecea; color: #b00020; padding: 12px; border-radius: 8px; }}
.success {{ background: #e8f5e9; padding: 12px; border-radius: 8px; white-space: pre-wrap; }}
</style>
</head>
<body>
<h1>&#129534; Receipt Analyzer AI</h1>
<p>Upload a receipt image and ask questions about its contents</p>
{alerts}<form method="post" action="/" enctype="multipart/form-data">
<label for="credential">Enter Google API Key:</label>
<input id="credential" name="credential" type="password" autocomplete="off">
<small>{credential_hint}</small>
<label for="image">Choose a receipt image...</label>
<input id="image" name="image" type="file" accept=".jpg,.jpeg,.png,image/jpeg,image/png">
{image_hint}
<label for="question">Ask a question about the receipt:</label>
<input id="question" name="question" type="text" placeholder="What is the total amount?" value="{question}">
<p><button type="submit">Analyze Receipt</button></p>
</form>
{result}{INSTRUCTIONS}</body>
</html>
"#,
        question = escape(&view.question),
    )
}
