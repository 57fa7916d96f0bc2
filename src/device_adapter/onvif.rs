//! ONVIF Media adapter
//!
//! GetCapabilities(Media) → GetProfiles → GetStreamUri, every call signed with
//! a WS-Security UsernameToken digest.

use super::ws_security::{escape_xml, security_header};
use super::xml::{capability_xaddr, element_attribute, element_text, soap_fault};
use super::{DeviceAdapter, ResolveError};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;

const DEVICE_SERVICE_PATH: &str = "/onvif/device_service";
const SOAP_CONTENT_TYPE: &str = "application/soap+xml; charset=utf-8";

/// ONVIF DeviceAdapter
pub struct OnvifAdapter {
    client: reqwest::Client,
    port: u16,
}

impl OnvifAdapter {
    /// Create adapter talking to `http://{address}:{port}/onvif/device_service`
    pub fn new(port: u16, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, port })
    }

    fn device_service_url(&self, address: &str) -> String {
        format!("http://{}:{}{}", address, self.port, DEVICE_SERVICE_PATH)
    }

    async fn soap_call(
        &self,
        url: &str,
        body: &str,
        username: &str,
        password: &str,
    ) -> std::result::Result<String, ResolveError> {
        let envelope = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope">
  <s:Header>
    {}
  </s:Header>
  <s:Body>{}</s:Body>
</s:Envelope>"#,
            security_header(username, password),
            body
        );

        let resp = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, SOAP_CONTENT_TYPE)
            .body(envelope)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    ResolveError::DeviceUnreachable(format!("{}: {}", url, e))
                } else {
                    ResolveError::ResolutionFailure(format!("{}: {}", url, e))
                }
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ResolveError::AuthenticationFailure(format!("HTTP {}", status)));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| ResolveError::DeviceUnreachable(format!("{}: {}", url, e)))?;

        if let Some(reason) = soap_fault(&text) {
            if text.contains("NotAuthorized") || reason.to_lowercase().contains("not authorized") {
                return Err(ResolveError::AuthenticationFailure(reason));
            }
            return Err(ResolveError::ResolutionFailure(reason));
        }

        if !status.is_success() {
            return Err(ResolveError::ResolutionFailure(format!("HTTP {}", status)));
        }

        Ok(text)
    }

    async fn media_service_url(
        &self,
        address: &str,
        username: &str,
        password: &str,
    ) -> std::result::Result<String, ResolveError> {
        let device_url = self.device_service_url(address);
        let body = r#"<tds:GetCapabilities xmlns:tds="http://www.onvif.org/ver10/device/wsdl"><tds:Category>Media</tds:Category></tds:GetCapabilities>"#;

        match self.soap_call(&device_url, body, username, password).await {
            Ok(xml) => Ok(capability_xaddr(&xml, "Media").unwrap_or(device_url)),
            // Some firmwares refuse GetCapabilities but serve media on the device endpoint
            Err(ResolveError::ResolutionFailure(reason)) => {
                tracing::debug!(
                    address = %address,
                    reason = %reason,
                    "GetCapabilities failed, using device service for media"
                );
                Ok(device_url)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl DeviceAdapter for OnvifAdapter {
    async fn resolve(
        &self,
        address: &str,
        username: &str,
        password: &str,
    ) -> std::result::Result<String, ResolveError> {
        let media_url = self.media_service_url(address, username, password).await?;

        let profiles = self
            .soap_call(
                &media_url,
                r#"<trt:GetProfiles xmlns:trt="http://www.onvif.org/ver10/media/wsdl"/>"#,
                username,
                password,
            )
            .await?;
        let token = element_attribute(&profiles, "Profiles", "token").ok_or_else(|| {
            ResolveError::ResolutionFailure("device reported no media profiles".to_string())
        })?;

        let stream_uri_body = format!(
            r#"<trt:GetStreamUri xmlns:trt="http://www.onvif.org/ver10/media/wsdl" xmlns:tt="http://www.onvif.org/ver10/schema"><trt:StreamSetup><tt:Stream>RTP-Unicast</tt:Stream><tt:Transport><tt:Protocol>RTSP</tt:Protocol></tt:Transport></trt:StreamSetup><trt:ProfileToken>{}</trt:ProfileToken></trt:GetStreamUri>"#,
            escape_xml(&token)
        );
        let stream_uri = self
            .soap_call(&media_url, &stream_uri_body, username, password)
            .await?;
        let uri = element_text(&stream_uri, "Uri").ok_or_else(|| {
            ResolveError::ResolutionFailure(format!("no stream URI for profile {}", token))
        })?;

        tracing::debug!(address = %address, profile = %token, "Stream URI resolved");

        Ok(with_credentials(&uri, username, password))
    }
}

/// Embed percent-encoded credentials into the userinfo part of a stream URI,
/// replacing any userinfo the camera already put there
pub fn with_credentials(uri: &str, username: &str, password: &str) -> String {
    if username.is_empty() {
        return uri.to_string();
    }
    let Some((scheme, rest)) = uri.split_once("://") else {
        return uri.to_string();
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let host_part = match rest[..authority_end].rfind('@') {
        Some(at) => &rest[at + 1..],
        None => rest,
    };
    format!(
        "{}://{}:{}@{}",
        scheme,
        urlencoding::encode(username),
        urlencoding::encode(password),
        host_part
    )
}
