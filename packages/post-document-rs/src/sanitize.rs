use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

const DEFAULT_MAX_NESTING_DEPTH: usize = 100;
const DEFAULT_MAX_ATTRIBUTE_COUNT: usize = 1000;
const CRITICAL_PROTOCOLS: [&str; 3] = ["javascript:", "vbscript:", "data:"];
const BLOCKED_TAGS: [&str; 5] = ["script", "style", "iframe", "object", "embed"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SanitizePolicy {
    pub allowed_url_protocols: Vec<String>,
    pub max_nesting_depth: usize,
    pub max_attribute_count: usize,
}

impl Default for SanitizePolicy {
    fn default() -> Self {
        Self {
            allowed_url_protocols: vec![
                "https:".to_string(),
                "http:".to_string(),
                "mailto:".to_string(),
            ],
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
            max_attribute_count: DEFAULT_MAX_ATTRIBUTE_COUNT,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SanitizeDiagnostic {
    pub kind: &'static str,
    pub detail: String,
    pub severity: Severity,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SanitizedHtml {
    pub html: String,
    pub diagnostics: Vec<SanitizeDiagnostic>,
}

impl SanitizedHtml {
    pub fn has_critical(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|diagnostic| diagnostic.severity == Severity::Critical)
    }
}

struct TagState {
    current_depth: usize,
    max_depth: usize,
    max_attrs: usize,
    depth_reported: bool,
}

struct AttributeMatch {
    raw_name: String,
    name: String,
    value: String,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum UrlSafety {
    Safe,
    Unsafe,
    Critical,
}

// Attributes may follow the tag name after whitespace or `/`, as browsers accept both.
static TAG_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<(/?)([a-zA-Z][\w:-]*)([\s/](?:[^"'>]+|"[^"]*"|'[^']*')*)?>"#)
        .expect("invalid tag regex")
});

static ATTR_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([a-zA-Z_][\w:-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("invalid attr regex")
});

static CHAR_REF_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(?:#[xX]([0-9a-fA-F]{1,8});?|#([0-9]{1,10});?|([a-zA-Z][a-zA-Z0-9]{1,31});)")
        .expect("invalid character reference regex")
});

static COMMENT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").expect("invalid comment regex"));

static BLOCKED_REGEXES: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    BLOCKED_TAGS
        .iter()
        .map(|tag| {
            let pattern = format!(r"(?is)<\s*{tag}\b[^>]*>.*?<\s*/\s*{tag}\s*>");
            (*tag, Regex::new(&pattern).expect("invalid blocked tag regex"))
        })
        .collect()
});

/// Strips active content from an HTML fragment. Never rejects: anything unsafe is
/// removed and reported as a diagnostic.
pub fn sanitize_html(html: &str, policy: &SanitizePolicy) -> SanitizedHtml {
    let mut diagnostics = Vec::new();
    let stripped = strip_blocked_elements(html, &mut diagnostics);

    let mut output = String::with_capacity(stripped.len());
    let mut state = TagState {
        current_depth: 0,
        max_depth: policy.max_nesting_depth,
        max_attrs: policy.max_attribute_count,
        depth_reported: false,
    };

    let mut last_index = 0;
    for captures in TAG_REGEX.captures_iter(&stripped) {
        let Some(mat) = captures.get(0) else {
            continue;
        };

        push_text_segment(&mut output, &stripped[last_index..mat.start()], &mut diagnostics);

        let closing = captures.get(1).map(|value| value.as_str()).unwrap_or("");
        let tag_name = captures.get(2).map(|value| value.as_str()).unwrap_or("");
        let attrs = captures.get(3).map(|value| value.as_str()).unwrap_or("");

        let sanitized =
            sanitize_tag_match(closing, tag_name, attrs, policy, &mut diagnostics, &mut state);
        output.push_str(&sanitized);

        last_index = mat.end();
    }
    push_text_segment(&mut output, &stripped[last_index..], &mut diagnostics);

    if diagnostics
        .iter()
        .any(|diagnostic| diagnostic.severity == Severity::Critical)
    {
        tracing::warn!(count = diagnostics.len(), "stripped active content from rendered html");
    }

    SanitizedHtml {
        html: output,
        diagnostics,
    }
}

fn push_diag(
    diagnostics: &mut Vec<SanitizeDiagnostic>,
    kind: &'static str,
    detail: String,
    severity: Severity,
) {
    diagnostics.push(SanitizeDiagnostic {
        kind,
        detail,
        severity,
    });
}

/// Copies text that sits between rebuilt tags. Any `<` left here did not open a
/// tag the scanner could rebuild, so it is written as `&lt;`.
fn push_text_segment(output: &mut String, segment: &str, diagnostics: &mut Vec<SanitizeDiagnostic>) {
    if !segment.contains('<') {
        output.push_str(segment);
        return;
    }
    push_diag(
        diagnostics,
        "escaped_markup",
        "Escaped markup that is not a well-formed tag".to_string(),
        Severity::Warning,
    );
    output.push_str(&segment.replace('<', "&lt;"));
}

/// Decodes numeric and common named character references, as a browser does
/// before it looks at an attribute value.
fn decode_char_refs(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    CHAR_REF_REGEX
        .replace_all(value, |caps: &regex::Captures| {
            let decoded = if let Some(hex) = caps.get(1) {
                u32::from_str_radix(hex.as_str(), 16).ok().map(code_point)
            } else if let Some(decimal) = caps.get(2) {
                decimal.as_str().parse::<u32>().ok().map(code_point)
            } else {
                caps.get(3).and_then(|name| named_char_ref(name.as_str()))
            };
            match decoded {
                Some(ch) => ch.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn code_point(code: u32) -> char {
    match code {
        0 => char::REPLACEMENT_CHARACTER,
        _ => char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER),
    }
}

fn named_char_ref(name: &str) -> Option<char> {
    let ch = match name {
        "amp" | "AMP" => '&',
        "lt" | "LT" => '<',
        "gt" | "GT" => '>',
        "quot" | "QUOT" => '"',
        "apos" => '\'',
        "colon" => ':',
        "Tab" => '\t',
        "NewLine" => '\n',
        "nbsp" => '\u{a0}',
        "sol" => '/',
        "bsol" => '\\',
        "lpar" => '(',
        "rpar" => ')',
        "period" => '.',
        "comma" => ',',
        "semi" => ';',
        "equals" => '=',
        "num" => '#',
        "excl" => '!',
        "quest" => '?',
        "percnt" => '%',
        "plus" => '+',
        "commat" => '@',
        _ => return None,
    };
    Some(ch)
}

fn encode_attribute_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

fn normalize_url(value: &str) -> String {
    value
        .trim()
        .to_lowercase()
        .chars()
        .filter(|ch| {
            let code = *ch as u32;
            code > 0x1f && code != 0x7f && !ch.is_whitespace()
        })
        .collect()
}

fn classify_url(url: &str, allowed_protocols: &[String]) -> UrlSafety {
    let normalized = normalize_url(url);

    if CRITICAL_PROTOCOLS
        .iter()
        .any(|proto| normalized.starts_with(proto))
    {
        return UrlSafety::Critical;
    }

    if allowed_protocols
        .iter()
        .map(|proto| proto.trim().to_lowercase())
        .any(|proto| normalized.starts_with(&proto))
    {
        return UrlSafety::Safe;
    }

    if normalized.starts_with('/') || normalized.starts_with('#') || !normalized.contains(':') {
        return UrlSafety::Safe;
    }

    UrlSafety::Unsafe
}

fn is_allowed_tag(tag: &str) -> bool {
    matches!(
        tag,
        "p" | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "strong"
            | "b"
            | "em"
            | "i"
            | "del"
            | "s"
            | "code"
            | "pre"
            | "a"
            | "img"
            | "blockquote"
            | "ul"
            | "ol"
            | "li"
            | "br"
            | "hr"
            | "input"
            | "table"
            | "thead"
            | "tbody"
            | "tr"
            | "th"
            | "td"
            | "sup"
            | "span"
    )
}

fn is_void_tag(tag: &str) -> bool {
    matches!(tag, "br" | "hr" | "img" | "input" | "col" | "source" | "area")
}

fn is_url_attribute(name: &str) -> bool {
    matches!(name, "href" | "src" | "srcset" | "poster" | "xlink:href")
}

fn is_allowed_attribute(tag: &str, name: &str) -> bool {
    match tag {
        "a" => matches!(name, "href" | "title" | "rel" | "target"),
        "img" => matches!(name, "src" | "alt" | "title"),
        "code" => name == "class",
        "ol" => name == "start",
        "input" => matches!(name, "type" | "checked" | "disabled"),
        "td" | "th" => matches!(name, "colspan" | "rowspan"),
        _ => false,
    }
}

fn collect_attribute_matches(attrs: &str) -> Vec<AttributeMatch> {
    ATTR_REGEX
        .captures_iter(attrs)
        .filter_map(|caps| {
            let raw_name = caps.get(1)?.as_str();
            let value = caps.get(2).or_else(|| caps.get(3))?.as_str();
            Some(AttributeMatch {
                raw_name: raw_name.to_string(),
                name: raw_name.to_lowercase(),
                value: decode_char_refs(value),
            })
        })
        .collect()
}

fn sanitize_attribute(
    tag: &str,
    item: &AttributeMatch,
    policy: &SanitizePolicy,
    diagnostics: &mut Vec<SanitizeDiagnostic>,
) -> Option<String> {
    if item.name.starts_with("on") {
        push_diag(
            diagnostics,
            "removed_attr",
            format!("Removed event handler attribute: {}", item.name),
            Severity::Critical,
        );
        return None;
    }

    if item.name == "style" {
        push_diag(
            diagnostics,
            "removed_attr",
            "Removed style attribute".to_string(),
            Severity::Warning,
        );
        return None;
    }

    if is_url_attribute(&item.name) {
        match classify_url(&item.value, &policy.allowed_url_protocols) {
            UrlSafety::Safe => {}
            UrlSafety::Unsafe => {
                push_diag(
                    diagnostics,
                    "sanitized_url",
                    format!("Removed unsafe URL in {}", item.name),
                    Severity::Warning,
                );
                return None;
            }
            UrlSafety::Critical => {
                push_diag(
                    diagnostics,
                    "critical_url",
                    format!("Removed critical URL in {}: {}", item.name, item.value),
                    Severity::Critical,
                );
                return None;
            }
        }
    }

    if !is_allowed_attribute(tag, &item.name) {
        push_diag(
            diagnostics,
            "removed_attr",
            format!("Removed non-allowlisted attribute: {}", item.name),
            Severity::Warning,
        );
        return None;
    }

    Some(format!(
        "{}=\"{}\"",
        item.raw_name,
        encode_attribute_value(&item.value)
    ))
}

fn update_depth(
    state: &mut TagState,
    tag: &str,
    is_closing: bool,
    is_self_closing: bool,
    diagnostics: &mut Vec<SanitizeDiagnostic>,
) {
    if is_void_tag(tag) {
        return;
    }
    if is_closing {
        state.current_depth = state.current_depth.saturating_sub(1);
        return;
    }
    if is_self_closing {
        return;
    }

    state.current_depth += 1;
    if state.current_depth > state.max_depth && !state.depth_reported {
        state.depth_reported = true;
        push_diag(
            diagnostics,
            "limit_exceeded",
            format!(
                "Nesting depth exceeded: {} > {}",
                state.current_depth, state.max_depth
            ),
            Severity::Warning,
        );
    }
}

fn sanitize_tag_match(
    closing: &str,
    tag_name: &str,
    attrs: &str,
    policy: &SanitizePolicy,
    diagnostics: &mut Vec<SanitizeDiagnostic>,
    state: &mut TagState,
) -> String {
    let lower_tag = tag_name.to_lowercase();
    let is_closing = closing == "/";
    let is_self_closing = attrs.trim().ends_with('/');

    update_depth(state, &lower_tag, is_closing, is_self_closing, diagnostics);

    if is_closing {
        return if is_allowed_tag(&lower_tag) && !is_void_tag(&lower_tag) {
            format!("</{lower_tag}>")
        } else {
            String::new()
        };
    }

    if !is_allowed_tag(&lower_tag) {
        push_diag(
            diagnostics,
            "removed_tag",
            format!("Removed non-allowlisted tag: <{tag_name}>"),
            Severity::Warning,
        );
        return String::new();
    }

    let matches = if attrs.is_empty() {
        Vec::new()
    } else {
        collect_attribute_matches(attrs)
    };

    if matches.len() > state.max_attrs {
        push_diag(
            diagnostics,
            "limit_exceeded",
            format!(
                "Attribute count exceeded for <{tag_name}>: {} > {}",
                matches.len(),
                state.max_attrs
            ),
            Severity::Warning,
        );
    }

    let filtered: Vec<String> = matches
        .iter()
        .take(state.max_attrs)
        .filter_map(|item| sanitize_attribute(&lower_tag, item, policy, diagnostics))
        .collect();

    if filtered.is_empty() {
        format!("<{lower_tag}>")
    } else {
        format!("<{lower_tag} {}>", filtered.join(" "))
    }
}

fn strip_blocked_elements(html: &str, diagnostics: &mut Vec<SanitizeDiagnostic>) -> String {
    let mut result = COMMENT_REGEX.replace_all(html, "").into_owned();

    for (tag, regex) in BLOCKED_REGEXES.iter() {
        result = regex
            .replace_all(&result, |_caps: &regex::Captures| {
                push_diag(
                    diagnostics,
                    "removed_tag",
                    format!("Removed blocked element: <{tag}>"),
                    Severity::Critical,
                );
                ""
            })
            .into_owned();
    }

    result
}
