use crate::error::MqError;
use crate::socket::types::SocketType;
use std::path::PathBuf;

/// A parsed and validated endpoint address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Endpoint {
  /// Address part (e.g. "127.0.0.1:5555" or "*:5555") plus the original URI.
  Tcp(String, String),
  Ipc(PathBuf, String),
  Inproc(String),
  /// Optional interface, multicast group, port, whether udp-encapsulated
  /// (epgm), and the original URI.
  Pgm {
    iface: Option<String>,
    group: String,
    port: u16,
    encapsulated: bool,
    uri: String,
  },
}

impl Endpoint {
  pub fn uri(&self) -> String {
    match self {
      Endpoint::Tcp(_, uri) => uri.clone(),
      Endpoint::Ipc(_, uri) => uri.clone(),
      Endpoint::Inproc(name) => format!("inproc://{name}"),
      Endpoint::Pgm { uri, .. } => uri.clone(),
    }
  }
}

/// Parses `protocol://endpoint` into a structured endpoint.
pub(crate) fn parse_endpoint(endpoint_str: &str) -> Result<Endpoint, MqError> {
  let invalid = || MqError::AddrInvalid(endpoint_str.to_string());

  let Some(separator) = endpoint_str.find("://") else {
    return Err(invalid());
  };
  let scheme = &endpoint_str[..separator];
  let address = &endpoint_str[separator + 3..];
  if address.is_empty() || address.contains('\0') {
    return Err(invalid());
  }

  match scheme {
    "tcp" => {
      // Expect host:port with a non-empty host ("*" means any interface).
      let Some(colon) = address.rfind(':') else {
        return Err(invalid());
      };
      let (host, port) = (&address[..colon], &address[colon + 1..]);
      if host.is_empty() {
        return Err(invalid());
      }
      if port != "*" && port.parse::<u16>().is_err() {
        return Err(invalid());
      }
      Ok(Endpoint::Tcp(address.to_string(), endpoint_str.to_string()))
    }
    "ipc" => Ok(Endpoint::Ipc(PathBuf::from(address), endpoint_str.to_string())),
    "inproc" => Ok(Endpoint::Inproc(address.to_string())),
    "pgm" | "epgm" => {
      // protocol://iface;group:port with the interface optional.
      let (iface, rest) = match address.split_once(';') {
        Some((iface, rest)) => {
          if iface.is_empty() {
            return Err(invalid());
          }
          (Some(iface.to_string()), rest)
        }
        None => (None, address),
      };
      let Some(colon) = rest.rfind(':') else {
        return Err(invalid());
      };
      let (group, port) = (&rest[..colon], &rest[colon + 1..]);
      if group.is_empty() {
        return Err(invalid());
      }
      let port: u16 = port.parse().map_err(|_| invalid())?;
      Ok(Endpoint::Pgm {
        iface,
        group: group.to_string(),
        port,
        encapsulated: scheme == "epgm",
        uri: endpoint_str.to_string(),
      })
    }
    _ => Err(MqError::ProtocolNotSupported(endpoint_str.to_string())),
  }
}

/// Multicast transports only make sense for the publish/subscribe
/// patterns.
pub(crate) fn pgm_compatible(socket_type: SocketType) -> bool {
  matches!(
    socket_type,
    SocketType::Pub | SocketType::Sub | SocketType::XPub | SocketType::XSub
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_tcp() {
    match parse_endpoint("tcp://127.0.0.1:5555").unwrap() {
      Endpoint::Tcp(addr, uri) => {
        assert_eq!(addr, "127.0.0.1:5555");
        assert_eq!(uri, "tcp://127.0.0.1:5555");
      }
      other => panic!("unexpected endpoint {other:?}"),
    }
    assert!(parse_endpoint("tcp://*:0").is_ok());
    assert!(parse_endpoint("tcp://host:notaport").is_err());
    assert!(parse_endpoint("tcp://:5555").is_err());
  }

  #[test]
  fn parses_inproc_and_ipc() {
    assert!(matches!(
      parse_endpoint("inproc://worker-42").unwrap(),
      Endpoint::Inproc(name) if name == "worker-42"
    ));
    assert!(matches!(
      parse_endpoint("ipc:///tmp/sock").unwrap(),
      Endpoint::Ipc(path, _) if path == PathBuf::from("/tmp/sock")
    ));
  }

  #[test]
  fn parses_pgm_with_and_without_interface() {
    match parse_endpoint("pgm://eth0;239.1.1.1:7500").unwrap() {
      Endpoint::Pgm {
        iface,
        group,
        port,
        encapsulated,
        ..
      } => {
        assert_eq!(iface.as_deref(), Some("eth0"));
        assert_eq!(group, "239.1.1.1");
        assert_eq!(port, 7500);
        assert!(!encapsulated);
      }
      other => panic!("unexpected endpoint {other:?}"),
    }
    assert!(matches!(
      parse_endpoint("epgm://239.1.1.1:7500").unwrap(),
      Endpoint::Pgm {
        iface: None,
        encapsulated: true,
        ..
      }
    ));
    assert!(parse_endpoint("pgm://;239.1.1.1:7500").is_err());
  }

  #[test]
  fn rejects_unknown_schemes_and_malformed_uris() {
    assert!(matches!(
      parse_endpoint("udp://127.0.0.1:1"),
      Err(MqError::ProtocolNotSupported(_))
    ));
    assert!(matches!(parse_endpoint("tcp127.0.0.1"), Err(MqError::AddrInvalid(_))));
    assert!(matches!(parse_endpoint("inproc://"), Err(MqError::AddrInvalid(_))));
  }
}
