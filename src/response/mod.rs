//! IRC numeric replies the engine dispatches on.
//!
//! Numerics outside this set still reach the application as
//! `IrcEvent::ServerLine`; they simply have no [`Response`] value.
//!
//! # Reference
//! - RFC 2812: Internet Relay Chat: Client Protocol
//! - Modern IRC documentation: <https://modern.ircdocs.horse/>

#![allow(non_camel_case_types)]

/// IRC server response code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
#[non_exhaustive]
pub enum Response {
    // === Connection Registration (001-099) ===
    /// 001 - Welcome to the IRC network
    RPL_WELCOME = 1,
    /// 005 - Server supported features (ISUPPORT)
    RPL_ISUPPORT = 5,

    // === Command Responses (200-399) ===
    /// 301 - User is away
    RPL_AWAY = 301,
    /// 302 - USERHOST reply
    RPL_USERHOST = 302,
    /// 305 - No longer marked away
    RPL_UNAWAY = 305,
    /// 306 - Marked as away
    RPL_NOWAWAY = 306,
    /// 322 - LIST row
    RPL_LIST = 322,
    /// 323 - End of LIST
    RPL_LISTEND = 323,
    /// 352 - WHO reply
    RPL_WHOREPLY = 352,
    /// 354 - WHOX reply
    RPL_WHOSPCRPL = 354,
    /// 367 - Ban list entry
    RPL_BANLIST = 367,
    /// 368 - End of ban list
    RPL_ENDOFBANLIST = 368,

    // === IRCv3 (700-799) ===
    /// 730 - Monitored nicks online
    RPL_MONONLINE = 730,
    /// 731 - Monitored nicks offline
    RPL_MONOFFLINE = 731,
    /// 732 - Monitor list entries
    RPL_MONLIST = 732,
    /// 733 - End of monitor list
    RPL_ENDOFMONLIST = 733,
    /// 734 - Monitor list full
    ERR_MONLISTFULL = 734,

    // === SASL (900-908) ===
    /// 900 - Logged in as account
    RPL_LOGGEDIN = 900,
    /// 901 - Logged out
    RPL_LOGGEDOUT = 901,
    /// 902 - Nick locked
    ERR_NICKLOCKED = 902,
    /// 903 - SASL authentication successful
    RPL_SASLSUCCESS = 903,
    /// 904 - SASL authentication failed
    ERR_SASLFAIL = 904,
    /// 905 - SASL message too long
    ERR_SASLTOOLONG = 905,
    /// 906 - SASL authentication aborted
    ERR_SASLABORT = 906,
    /// 907 - Already authenticated
    ERR_SASLALREADY = 907,
    /// 908 - Available SASL mechanisms
    RPL_SASLMECHS = 908,
}

impl Response {
    /// Returns the numeric code as u16
    #[inline]
    pub fn code(&self) -> u16 {
        *self as u16
    }

    /// Creates a Response from a numeric code
    pub fn from_code(code: u16) -> Option<Response> {
        Some(match code {
            1 => Response::RPL_WELCOME,
            5 => Response::RPL_ISUPPORT,
            301 => Response::RPL_AWAY,
            302 => Response::RPL_USERHOST,
            305 => Response::RPL_UNAWAY,
            306 => Response::RPL_NOWAWAY,
            322 => Response::RPL_LIST,
            323 => Response::RPL_LISTEND,
            352 => Response::RPL_WHOREPLY,
            354 => Response::RPL_WHOSPCRPL,
            367 => Response::RPL_BANLIST,
            368 => Response::RPL_ENDOFBANLIST,
            730 => Response::RPL_MONONLINE,
            731 => Response::RPL_MONOFFLINE,
            732 => Response::RPL_MONLIST,
            733 => Response::RPL_ENDOFMONLIST,
            734 => Response::ERR_MONLISTFULL,
            900 => Response::RPL_LOGGEDIN,
            901 => Response::RPL_LOGGEDOUT,
            902 => Response::ERR_NICKLOCKED,
            903 => Response::RPL_SASLSUCCESS,
            904 => Response::ERR_SASLFAIL,
            905 => Response::ERR_SASLTOOLONG,
            906 => Response::ERR_SASLABORT,
            907 => Response::ERR_SASLALREADY,
            908 => Response::RPL_SASLMECHS,
            _ => return None,
        })
    }

    /// Check if this is a SASL-related response (900-908)
    #[inline]
    pub fn is_sasl(&self) -> bool {
        (900..=908).contains(&self.code())
    }

    /// Check if this is a MONITOR response (730-734)
    #[inline]
    pub fn is_monitor(&self) -> bool {
        (730..=734).contains(&self.code())
    }
}
