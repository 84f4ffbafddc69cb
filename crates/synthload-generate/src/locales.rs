use std::fmt;

use serde::{Deserialize, Serialize};

/// Locales supported by the name source.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocaleKey {
    #[default]
    #[serde(rename = "en_US")]
    EnUs,
    #[serde(rename = "pt_BR")]
    PtBr,
}

impl LocaleKey {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "en_US" | "en-US" | "en" => Some(Self::EnUs),
            "pt_BR" | "pt-BR" | "pt" => Some(Self::PtBr),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::EnUs => "en_US",
            Self::PtBr => "pt_BR",
        }
    }

    pub(crate) fn fallback_first_names(self) -> &'static [&'static str] {
        match self {
            Self::EnUs => &["James", "Mary", "Robert", "Linda", "Michael", "Susan"],
            Self::PtBr => &["Ana", "Bruno", "Carlos", "Daniela", "Eduardo", "Fernanda"],
        }
    }

    pub(crate) fn fallback_last_names(self) -> &'static [&'static str] {
        match self {
            Self::EnUs => &["Smith", "Johnson", "Brown", "Taylor", "Miller", "Wilson"],
            Self::PtBr => &["Silva", "Santos", "Oliveira", "Souza", "Lima", "Costa"],
        }
    }
}

impl fmt::Display for LocaleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
