use std::{
    collections::HashMap,
    ops::{Deref, DerefMut},
};

use bytes::{Buf, BufMut};
use thiserror::Error;

use quinn_proto::coding::Codec;
use quinn_proto::VarInt;

use super::Frame;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    #[error("expected SETTINGS, got {0:?}")]
    UnexpectedFrame(Frame),

    #[error("invalid size")]
    InvalidSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Setting(pub VarInt);

macro_rules! settings {
    {$($name:ident = $val:expr,)*} => {
        impl Setting {
            $(pub const $name: Setting = Setting(VarInt::from_u32($val));)*
        }
    }
}

settings! {
    QPACK_MAX_TABLE_CAPACITY = 0x1,
    QPACK_BLOCKED_STREAMS = 0x7,

    // Both of these are required for WebTransport
    ENABLE_CONNECT_PROTOCOL = 0x8,
    ENABLE_DATAGRAM = 0x33,
    ENABLE_DATAGRAM_DEPRECATED = 0xFFD277, // still used by Chrome

    // Removed in draft 06
    WEBTRANSPORT_ENABLE_DEPRECATED = 0x2b603742,
    WEBTRANSPORT_MAX_SESSIONS_DEPRECATED = 0x2b603743,

    // New way to enable WebTransport
    WEBTRANSPORT_MAX_SESSIONS = 0xc671706a,
}

// A map of settings to values.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Settings(HashMap<Setting, VarInt>);

impl Settings {
    /// Decode the payload of a SETTINGS frame.
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self, SettingsError> {
        let mut settings = Settings::default();
        while buf.has_remaining() {
            let id = VarInt::decode(buf).map_err(|_| SettingsError::InvalidSize)?;
            let value = VarInt::decode(buf).map_err(|_| SettingsError::InvalidSize)?;
            settings.0.insert(Setting(id), value);
        }

        Ok(settings)
    }

    /// Encode a complete SETTINGS frame.
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        // Encode to a temporary buffer so we can learn the length.
        let mut tmp = Vec::new();
        for (id, value) in &self.0 {
            id.0.encode(&mut tmp);
            value.encode(&mut tmp);
        }

        Frame::SETTINGS.write(&tmp, buf);
    }

    pub fn enable_webtransport(&mut self, max_sessions: u32) {
        let max = VarInt::from_u32(max_sessions);

        self.insert(Setting::ENABLE_CONNECT_PROTOCOL, VarInt::from_u32(1));
        self.insert(Setting::ENABLE_DATAGRAM, VarInt::from_u32(1));
        self.insert(Setting::ENABLE_DATAGRAM_DEPRECATED, VarInt::from_u32(1));
        self.insert(Setting::WEBTRANSPORT_MAX_SESSIONS, max);

        // Older peers (draft02) still look for these.
        self.insert(Setting::WEBTRANSPORT_MAX_SESSIONS_DEPRECATED, max);
        self.insert(Setting::WEBTRANSPORT_ENABLE_DEPRECATED, VarInt::from_u32(1));
    }

    // Returns the maximum number of sessions supported.
    pub fn supports_webtransport(&self) -> u64 {
        match self.get(&Setting::ENABLE_CONNECT_PROTOCOL) {
            Some(v) if v.into_inner() == 1 => {}
            _ => return 0,
        };

        match self
            .get(&Setting::ENABLE_DATAGRAM)
            .or(self.get(&Setting::ENABLE_DATAGRAM_DEPRECATED))
        {
            Some(v) if v.into_inner() == 1 => {}
            _ => return 0,
        };

        // The deprecated (before draft-07) way of enabling WebTransport was to send two parameters.
        // Both would send ENABLE=1 and the server would send MAX_SESSIONS=N to limit the sessions.
        // Now both just send MAX_SESSIONS, and a non-zero value means WebTransport is enabled.

        match self.get(&Setting::WEBTRANSPORT_MAX_SESSIONS) {
            Some(max) => max.into_inner(),

            None => match self.get(&Setting::WEBTRANSPORT_MAX_SESSIONS_DEPRECATED) {
                Some(max) => max.into_inner(),

                // A client only sends ENABLE, which implies a single session.
                None => match self.get(&Setting::WEBTRANSPORT_ENABLE_DEPRECATED) {
                    Some(v) if v.into_inner() == 1 => 1,
                    _ => 0,
                },
            },
        }
    }
}

impl Deref for Settings {
    type Target = HashMap<Setting, VarInt>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Settings {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}
