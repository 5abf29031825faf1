//! System prompt selection by language and persona.
//!
//! Three long-form prompts exist (French, Darija/Arabic, English). French is the
//! primary language and the fallback.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

use crate::config::PromptsConfig;

const BUILTIN_FR: &str = include_str!("../../../prompts/fr.txt");
const BUILTIN_AR: &str = include_str!("../../../prompts/ar.txt");
const BUILTIN_EN: &str = include_str!("../../../prompts/en.txt");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Fr,
    Ar,
    En,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownLanguage(pub String);

impl fmt::Display for UnknownLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported language '{}'", self.0)
    }
}

impl std::error::Error for UnknownLanguage {}

impl FromStr for Language {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fr" => Ok(Language::Fr),
            "ar" => Ok(Language::Ar),
            "en" => Ok(Language::En),
            other => Err(UnknownLanguage(other.to_string())),
        }
    }
}

impl Language {
    pub fn code(self) -> &'static str {
        match self {
            Language::Fr => "fr",
            Language::Ar => "ar",
            Language::En => "en",
        }
    }

    /// Absent or blank → French. Unsupported codes also fall back to French,
    /// but not silently.
    pub fn resolve(raw: Option<&str>) -> Self {
        match raw.map(str::trim).filter(|s| !s.is_empty()) {
            None => Language::default(),
            Some(code) => code.parse().unwrap_or_else(|err: UnknownLanguage| {
                warn!("{}, falling back to '{}'", err, Language::default().code());
                Language::default()
            }),
        }
    }

    pub fn default_persona(self) -> Persona {
        match self {
            Language::Fr => Persona::ExpertComptable,
            Language::Ar => Persona::GrandFrereDarija,
            Language::En => Persona::WallStreetTrader,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Persona {
    ExpertComptable,
    GrandFrereDarija,
    WallStreetTrader,
    /// "كوتش مالي"
    CoachMali,
    /// "financial coach"
    FinancialCoach,
    Custom(String),
}

impl Persona {
    /// Case-insensitive; `None` for a blank value.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_lowercase();
        let persona = match normalized.as_str() {
            "" => return None,
            "expert_comptable" => Persona::ExpertComptable,
            "grand_frere_darija" => Persona::GrandFrereDarija,
            "wall_street_trader" => Persona::WallStreetTrader,
            "كوتش مالي" => Persona::CoachMali,
            "financial coach" => Persona::FinancialCoach,
            _ => Persona::Custom(normalized),
        };
        Some(persona)
    }

    pub fn label(&self) -> &str {
        match self {
            Persona::ExpertComptable => "expert_comptable",
            Persona::GrandFrereDarija => "grand_frere_darija",
            Persona::WallStreetTrader => "wall_street_trader",
            Persona::CoachMali => "كوتش مالي",
            Persona::FinancialCoach => "financial coach",
            Persona::Custom(label) => label,
        }
    }
}

/// Result of a prompt lookup
#[derive(Debug, Clone)]
pub struct PromptSelection {
    /// Requested language after normalization
    pub language: Language,
    pub persona: Persona,
    /// Language of the prompt text actually served
    pub voice: Language,
    pub text: Arc<str>,
}

/// The three coach prompts, built in or overridden from configuration
#[derive(Debug, Clone)]
pub struct PromptCatalog {
    fr: Arc<str>,
    ar: Arc<str>,
    en: Arc<str>,
}

impl Default for PromptCatalog {
    fn default() -> Self {
        Self {
            fr: Arc::from(BUILTIN_FR.trim_end()),
            ar: Arc::from(BUILTIN_AR.trim_end()),
            en: Arc::from(BUILTIN_EN.trim_end()),
        }
    }
}

impl PromptCatalog {
    pub fn from_config(config: &PromptsConfig) -> Self {
        let builtin = Self::default();
        let pick = |custom: &Option<String>, fallback: Arc<str>| match custom {
            Some(text) if !text.trim().is_empty() => Arc::from(text.as_str()),
            _ => fallback,
        };

        Self {
            fr: pick(&config.fr, builtin.fr),
            ar: pick(&config.ar, builtin.ar),
            en: pick(&config.en, builtin.en),
        }
    }

    pub fn text(&self, language: Language) -> Arc<str> {
        match language {
            Language::Fr => self.fr.clone(),
            Language::Ar => self.ar.clone(),
            Language::En => self.en.clone(),
        }
    }

    /// Pick the system prompt for a (language, persona) pair.
    ///
    /// The Darija persona or `ar` wins first, then the English persona or
    /// `en`; everything else gets French. An explicit persona is checked
    /// before the language in each branch, so `persona="financial coach"`
    /// with `language="fr"` still answers in English.
    pub fn select(&self, language: Option<&str>, persona: Option<&str>) -> PromptSelection {
        let language = Language::resolve(language);
        let persona = persona
            .and_then(Persona::parse)
            .unwrap_or_else(|| language.default_persona());

        let voice = if persona == Persona::CoachMali || language == Language::Ar {
            Language::Ar
        } else if persona == Persona::FinancialCoach || language == Language::En {
            Language::En
        } else {
            Language::Fr
        };

        PromptSelection {
            language,
            persona,
            voice,
            text: self.text(voice),
        }
    }
}
