//! Namespace-agnostic extraction helpers for ONVIF SOAP responses
//!
//! Cameras disagree on namespace prefixes (`tt:`, `trt:`, `tds:`, none at all),
//! so every lookup matches on the local element name only.

struct OpenTag<'a> {
    qname: &'a str,
    attrs: &'a str,
    content_start: usize,
    self_closing: bool,
}

fn find_open_tag<'a>(xml: &'a str, local: &str) -> Option<OpenTag<'a>> {
    let mut pos = 0;
    while let Some(rel) = xml[pos..].find('<') {
        let start = pos + rel + 1;
        pos = start;
        let rest = &xml[start..];
        let name_len = rest
            .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
            .unwrap_or(rest.len());
        let qname = &rest[..name_len];
        if qname.is_empty() || qname.starts_with('?') || qname.starts_with('!') {
            continue;
        }
        let local_name = qname.rsplit(':').next().unwrap_or(qname);
        if local_name != local {
            continue;
        }
        let close = rest.find('>')?;
        let head = &rest[name_len..close];
        let self_closing = head.ends_with('/');
        return Some(OpenTag {
            qname,
            attrs: head.trim_end_matches('/'),
            content_start: start + close + 1,
            self_closing,
        });
    }
    None
}

/// Inner XML of the first element with the given local name
pub fn element_section<'a>(xml: &'a str, local: &str) -> Option<&'a str> {
    let tag = find_open_tag(xml, local)?;
    if tag.self_closing {
        return Some("");
    }
    let close = format!("</{}", tag.qname);
    let end = xml[tag.content_start..].find(close.as_str())?;
    Some(&xml[tag.content_start..tag.content_start + end])
}

/// Trimmed, unescaped text of the first element with the given local name
pub fn element_text(xml: &str, local: &str) -> Option<String> {
    let section = element_section(xml, local)?;
    let text = section.trim();
    if text.is_empty() || text.contains('<') {
        return None;
    }
    Some(unescape_xml(text))
}

/// Attribute value on the first element with the given local name
pub fn element_attribute(xml: &str, local: &str, attr: &str) -> Option<String> {
    let tag = find_open_tag(xml, local)?;
    let attrs = tag.attrs;
    let mut search = 0;
    while let Some(rel) = attrs[search..].find(attr) {
        let at = search + rel;
        search = at + attr.len();
        let preceded_ok = attrs[..at]
            .chars()
            .next_back()
            .map_or(true, |c| c.is_whitespace());
        let after = attrs[search..].trim_start();
        if !preceded_ok || !after.starts_with('=') {
            continue;
        }
        let value = after[1..].trim_start();
        let quote = value.chars().next()?;
        if quote != '"' && quote != '\'' {
            return None;
        }
        let end = value[1..].find(quote)?;
        return Some(unescape_xml(&value[1..1 + end]));
    }
    None
}

/// XAddr advertised for a capability section (e.g. `Media`) in GetCapabilities
pub fn capability_xaddr(xml: &str, capability: &str) -> Option<String> {
    let section = element_section(xml, capability)?;
    element_text(section, "XAddr")
}

/// Fault reason when the body is a SOAP Fault
pub fn soap_fault(xml: &str) -> Option<String> {
    let fault = element_section(xml, "Fault")?;
    Some(
        element_text(fault, "Text")
            .or_else(|| element_text(fault, "Value"))
            .unwrap_or_else(|| "SOAP fault".to_string()),
    )
}

pub fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
