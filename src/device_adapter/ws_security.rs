//! WS-Security UsernameToken (PasswordDigest) header for ONVIF SOAP requests

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::Rng;
use sha1::{Digest, Sha1};

/// PasswordDigest = Base64(SHA1(nonce + created + password))
pub fn password_digest(nonce: &[u8], created: &str, password: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(nonce);
    hasher.update(created.as_bytes());
    hasher.update(password.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Build a `<wsse:Security>` header with a fresh 16-byte nonce
pub fn security_header(username: &str, password: &str) -> String {
    let nonce: [u8; 16] = rand::thread_rng().gen();
    let created = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    security_header_with(username, password, &nonce, &created)
}

fn security_header_with(username: &str, password: &str, nonce: &[u8], created: &str) -> String {
    format!(
        r#"<wsse:Security xmlns:wsse="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd" xmlns:wsu="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd">
      <wsse:UsernameToken>
        <wsse:Username>{}</wsse:Username>
        <wsse:Password Type="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#PasswordDigest">{}</wsse:Password>
        <wsse:Nonce EncodingType="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-soap-message-security-1.0#Base64Binary">{}</wsse:Nonce>
        <wsu:Created>{}</wsu:Created>
      </wsse:UsernameToken>
    </wsse:Security>"#,
        escape_xml(username),
        password_digest(nonce, created, password),
        STANDARD.encode(nonce),
        created
    )
}

/// Minimal text escaping for values placed inside SOAP elements
pub fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}
