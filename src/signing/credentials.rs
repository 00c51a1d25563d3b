//! Credential kinds held in the credential store

use std::fmt;
use std::str::FromStr;

/// A named credential a requester reads before each logical call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKind {
    /// Q&A device cookie (`d_c0`), optional
    QaDevice,
    /// Q&A login session cookie (`z_c0`), required
    QaSession,
    /// Q&A signature cookie (`__zse_ck`), optional
    QaSignatureCookie,
    /// Full cookie header for the paid community, required
    CommunityCookie,
}

impl CredentialKind {
    pub const ALL: [CredentialKind; 4] = [
        CredentialKind::QaDevice,
        CredentialKind::QaSession,
        CredentialKind::QaSignatureCookie,
        CredentialKind::CommunityCookie,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QaDevice => "qa_device",
            Self::QaSession => "qa_session",
            Self::QaSignatureCookie => "qa_signature_cookie",
            Self::CommunityCookie => "community_cookie",
        }
    }

    /// Cookie name the value is sent under, `None` for whole-header credentials
    pub fn cookie_name(&self) -> Option<&'static str> {
        match self {
            Self::QaDevice => Some("d_c0"),
            Self::QaSession => Some("z_c0"),
            Self::QaSignatureCookie => Some("__zse_ck"),
            Self::CommunityCookie => None,
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CredentialKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(|k| k.as_str()).collect();
                format!("unknown credential '{}' (expected one of {})", s, names.join(", "))
            })
    }
}
