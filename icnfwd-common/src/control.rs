//! Control-plane command grammar.
//!
//! The same line-oriented verbs are accepted from the configuration file at
//! startup and from the control socket at runtime. One command per line;
//! `#` starts a comment.

use crate::error::Error;
use crate::name::Name;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Transport protocol selector for listeners and connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Proto {
    Tcp,
    Udp,
}

impl FromStr for Proto {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Proto::Tcp),
            "udp" => Ok(Proto::Udp),
            other => Err(Error::Config(format!("unknown protocol '{}'", other))),
        }
    }
}

impl fmt::Display for Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Proto::Tcp => write!(f, "tcp"),
            Proto::Udp => write!(f, "udp"),
        }
    }
}

/// One parsed control verb.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlCommand {
    AddListener {
        name: String,
        proto: Proto,
        addr: String,
        port: u16,
    },
    AddConnection {
        name: String,
        proto: Proto,
        local: String,
        remote: String,
    },
    AddRoute {
        connection: String,
        prefix: Name,
        cost: u8,
    },
    RemoveRoute {
        connection: String,
        prefix: Name,
    },
    SetStrategy {
        prefix: Name,
        strategy: String,
    },
    /// Answer denied Interests (no route, no usable hop) with a NACK.
    SetNack(bool),
    CacheSize(usize),
    CacheStore(bool),
    CacheServe(bool),
    ListConnections,
    ListRoutes,
    Stats,
}

fn parse_on_off(word: &str) -> Result<bool, Error> {
    match word {
        "on" => Ok(true),
        "off" => Ok(false),
        other => Err(Error::Config(format!("expected on/off, got '{}'", other))),
    }
}

fn arity(words: &[&str], expected: usize) -> Result<(), Error> {
    if words.len() == expected {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "'{} {}' takes {} arguments, got {}",
            words[0],
            words.get(1).copied().unwrap_or(""),
            expected.saturating_sub(2),
            words.len().saturating_sub(2)
        )))
    }
}

impl ControlCommand {
    /// Parse one line. Returns `Ok(None)` for blank lines and comments.
    pub fn parse(line: &str) -> Result<Option<Self>, Error> {
        let line = match line.find('#') {
            Some(idx) => &line[..idx],
            None => line,
        };
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            return Ok(None);
        }

        let command = match (words[0], words.get(1).copied()) {
            ("add", Some("listener")) => {
                arity(&words, 6)?;
                ControlCommand::AddListener {
                    name: words[2].to_string(),
                    proto: words[3].parse()?,
                    addr: words[4].to_string(),
                    port: words[5]
                        .parse()
                        .map_err(|_| Error::Config(format!("bad port '{}'", words[5])))?,
                }
            }
            ("add", Some("connection")) => {
                arity(&words, 6)?;
                ControlCommand::AddConnection {
                    name: words[2].to_string(),
                    proto: words[3].parse()?,
                    local: words[4].to_string(),
                    remote: words[5].to_string(),
                }
            }
            ("add", Some("route")) => {
                arity(&words, 5)?;
                ControlCommand::AddRoute {
                    connection: words[2].to_string(),
                    prefix: Name::from_uri(words[3]),
                    cost: words[4]
                        .parse()
                        .map_err(|_| Error::Config(format!("bad cost '{}'", words[4])))?,
                }
            }
            ("remove", Some("route")) => {
                arity(&words, 4)?;
                ControlCommand::RemoveRoute {
                    connection: words[2].to_string(),
                    prefix: Name::from_uri(words[3]),
                }
            }
            ("set", Some("strategy")) => {
                arity(&words, 4)?;
                ControlCommand::SetStrategy {
                    prefix: Name::from_uri(words[2]),
                    strategy: words[3].to_string(),
                }
            }
            ("set", Some("nack")) => {
                arity(&words, 3)?;
                ControlCommand::SetNack(parse_on_off(words[2])?)
            }
            ("cache", Some("size")) => {
                arity(&words, 3)?;
                ControlCommand::CacheSize(
                    words[2]
                        .parse()
                        .map_err(|_| Error::Config(format!("bad cache size '{}'", words[2])))?,
                )
            }
            ("cache", Some("store")) => {
                arity(&words, 3)?;
                ControlCommand::CacheStore(parse_on_off(words[2])?)
            }
            ("cache", Some("serve")) => {
                arity(&words, 3)?;
                ControlCommand::CacheServe(parse_on_off(words[2])?)
            }
            ("list", Some("connections")) => {
                arity(&words, 2)?;
                ControlCommand::ListConnections
            }
            ("list", Some("routes")) => {
                arity(&words, 2)?;
                ControlCommand::ListRoutes
            }
            ("stats", None) => ControlCommand::Stats,
            _ => {
                return Err(Error::Config(format!(
                    "unknown control command '{}'",
                    line.trim()
                )));
            }
        };
        Ok(Some(command))
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlCommand::AddListener {
                name,
                proto,
                addr,
                port,
            } => write!(f, "add listener {} {} {} {}", name, proto, addr, port),
            ControlCommand::AddConnection {
                name,
                proto,
                local,
                remote,
            } => write!(f, "add connection {} {} {} {}", name, proto, local, remote),
            ControlCommand::AddRoute {
                connection,
                prefix,
                cost,
            } => write!(f, "add route {} {} {}", connection, prefix, cost),
            ControlCommand::RemoveRoute { connection, prefix } => {
                write!(f, "remove route {} {}", connection, prefix)
            }
            ControlCommand::SetStrategy { prefix, strategy } => {
                write!(f, "set strategy {} {}", prefix, strategy)
            }
            ControlCommand::SetNack(on) => {
                write!(f, "set nack {}", if *on { "on" } else { "off" })
            }
            ControlCommand::CacheSize(size) => write!(f, "cache size {}", size),
            ControlCommand::CacheStore(on) => {
                write!(f, "cache store {}", if *on { "on" } else { "off" })
            }
            ControlCommand::CacheServe(on) => {
                write!(f, "cache serve {}", if *on { "on" } else { "off" })
            }
            ControlCommand::ListConnections => write!(f, "list connections"),
            ControlCommand::ListRoutes => write!(f, "list routes"),
            ControlCommand::Stats => write!(f, "stats"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_and_blanks_are_skipped() {
        assert_eq!(ControlCommand::parse("").unwrap(), None);
        assert_eq!(ControlCommand::parse("   ").unwrap(), None);
        assert_eq!(ControlCommand::parse("# add route c0 /x 1").unwrap(), None);
    }

    #[test]
    fn trailing_comment_is_stripped() {
        let cmd = ControlCommand::parse("cache size 4096  # bigger box").unwrap();
        assert_eq!(cmd, Some(ControlCommand::CacheSize(4096)));
    }

    #[test]
    fn verbs_round_trip_through_display() {
        let lines = [
            "add listener lo0 tcp 127.0.0.1 9695",
            "add connection conn1 udp 0.0.0.0:0 192.0.2.1:9695",
            "add route conn1 /edge/sensor 1",
            "remove route conn1 /edge/sensor",
            "set strategy /edge multicast",
            "set nack on",
            "cache size 1000",
            "cache store off",
            "cache serve on",
            "list connections",
            "list routes",
            "stats",
        ];
        for line in lines {
            let cmd = ControlCommand::parse(line).unwrap().unwrap();
            let printed = cmd.to_string();
            let reparsed = ControlCommand::parse(&printed).unwrap().unwrap();
            assert_eq!(cmd, reparsed, "line: {}", line);
        }
    }

    #[test]
    fn bad_lines_are_rejected() {
        assert!(ControlCommand::parse("add route").is_err());
        assert!(ControlCommand::parse("add listener a tcp 1.2.3.4 notaport").is_err());
        assert!(ControlCommand::parse("cache store maybe").is_err());
        assert!(ControlCommand::parse("frobnicate").is_err());
    }
}
