//! WS-Discovery Probe message and response matching

use crate::device_adapter::xml::element_text;
use uuid::Uuid;

pub const WS_DISCOVERY_PORT: u16 = 3702;

/// ONVIF device type every camera advertises
pub const DEVICE_TYPE_MARKER: &str = "NetworkVideoTransmitter";

/// SOAP 1.2 Probe for `dn:NetworkVideoTransmitter`
pub fn probe_message(message_id: Uuid) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<e:Envelope xmlns:e="http://www.w3.org/2003/05/soap-envelope"
            xmlns:w="http://schemas.xmlsoap.org/ws/2004/08/addressing"
            xmlns:d="http://schemas.xmlsoap.org/ws/2005/04/discovery"
            xmlns:dn="http://www.onvif.org/ver10/network/wsdl">
  <e:Header>
    <w:MessageID>uuid:{}</w:MessageID>
    <w:To e:mustUnderstand="true">urn:schemas-xmlsoap-org:ws:2005:04:discovery</w:To>
    <w:Action e:mustUnderstand="true">http://schemas.xmlsoap.org/ws/2005/04/discovery/Probe</w:Action>
  </e:Header>
  <e:Body>
    <d:Probe>
      <d:Types>dn:{}</d:Types>
    </d:Probe>
  </e:Body>
</e:Envelope>"#,
        message_id, DEVICE_TYPE_MARKER
    )
}

pub fn is_video_transmitter(response: &str) -> bool {
    response.contains(DEVICE_TYPE_MARKER)
}

/// Service endpoints advertised in a ProbeMatch (informational only)
pub fn advertised_xaddrs(response: &str) -> Vec<String> {
    element_text(response, "XAddrs")
        .map(|text| text.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}
