use crate::error::StitchError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Matching dimensions. Two entities sharing a normalized value under the
/// same key are joined by a stitch edge of that key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StitchKey {
    /// Any name or synonym.
    #[serde(rename = "N_Name")]
    Name,

    /// FDA unique ingredient identifier.
    #[serde(rename = "I_UNII")]
    Unii,
    /// CAS registry number.
    #[serde(rename = "I_CAS")]
    Cas,
    /// PubChem substance id.
    #[serde(rename = "I_SID")]
    Sid,
    /// PubChem compound id.
    #[serde(rename = "I_CID")]
    Cid,
    #[serde(rename = "I_ChEMBL")]
    Chembl,
    /// DrugBank id.
    #[serde(rename = "I_DB")]
    DrugBank,
    /// Any code.
    #[serde(rename = "I_CODE")]
    Code,
    #[serde(rename = "I_MeSH")]
    Mesh,
    #[serde(rename = "I_UniProt")]
    UniProt,
    /// Clinical trial NCT number.
    #[serde(rename = "I_NCT")]
    Nct,
    /// PubMed id.
    #[serde(rename = "I_PMID")]
    Pmid,
    /// Any numeric id.
    #[serde(rename = "I_ANY")]
    AnyId,

    #[serde(rename = "H_InChIKey")]
    InchiKey,
    #[serde(rename = "H_LyChI_L1")]
    LychiL1,
    #[serde(rename = "H_LyChI_L2")]
    LychiL2,
    #[serde(rename = "H_LyChI_L3")]
    LychiL3,
    #[serde(rename = "H_LyChI_L4")]
    LychiL4,
    /// LyChI layer 4 with salt and solvent.
    #[serde(rename = "H_LyChI_L5")]
    LychiL5,
    #[serde(rename = "H_SHA1")]
    Sha1,
    #[serde(rename = "H_SHA256")]
    Sha256,
    #[serde(rename = "H_MD5")]
    Md5,

    #[serde(rename = "U_Wikipedia")]
    Wikipedia,
    #[serde(rename = "U_DOI")]
    Doi,

    /// Active moiety predicate. Directed, and the strongest relationship
    /// available for seeding component colors.
    #[serde(rename = "T_ActiveMoiety")]
    ActiveMoiety,
    #[serde(rename = "T_Keyword")]
    Keyword,
}

/// Shape of the values a key carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    Text,
    Integer,
}

/// Normalization family, selected by the key's name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Name,
    Identifier,
    Hash,
    Url,
    Term,
}

impl StitchKey {
    pub const ALL: [StitchKey; 26] = [
        StitchKey::Name,
        StitchKey::Unii,
        StitchKey::Cas,
        StitchKey::Sid,
        StitchKey::Cid,
        StitchKey::Chembl,
        StitchKey::DrugBank,
        StitchKey::Code,
        StitchKey::Mesh,
        StitchKey::UniProt,
        StitchKey::Nct,
        StitchKey::Pmid,
        StitchKey::AnyId,
        StitchKey::InchiKey,
        StitchKey::LychiL1,
        StitchKey::LychiL2,
        StitchKey::LychiL3,
        StitchKey::LychiL4,
        StitchKey::LychiL5,
        StitchKey::Sha1,
        StitchKey::Sha256,
        StitchKey::Md5,
        StitchKey::Wikipedia,
        StitchKey::Doi,
        StitchKey::ActiveMoiety,
        StitchKey::Keyword,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StitchKey::Name => "N_Name",
            StitchKey::Unii => "I_UNII",
            StitchKey::Cas => "I_CAS",
            StitchKey::Sid => "I_SID",
            StitchKey::Cid => "I_CID",
            StitchKey::Chembl => "I_ChEMBL",
            StitchKey::DrugBank => "I_DB",
            StitchKey::Code => "I_CODE",
            StitchKey::Mesh => "I_MeSH",
            StitchKey::UniProt => "I_UniProt",
            StitchKey::Nct => "I_NCT",
            StitchKey::Pmid => "I_PMID",
            StitchKey::AnyId => "I_ANY",
            StitchKey::InchiKey => "H_InChIKey",
            StitchKey::LychiL1 => "H_LyChI_L1",
            StitchKey::LychiL2 => "H_LyChI_L2",
            StitchKey::LychiL3 => "H_LyChI_L3",
            StitchKey::LychiL4 => "H_LyChI_L4",
            StitchKey::LychiL5 => "H_LyChI_L5",
            StitchKey::Sha1 => "H_SHA1",
            StitchKey::Sha256 => "H_SHA256",
            StitchKey::Md5 => "H_MD5",
            StitchKey::Wikipedia => "U_Wikipedia",
            StitchKey::Doi => "U_DOI",
            StitchKey::ActiveMoiety => "T_ActiveMoiety",
            StitchKey::Keyword => "T_Keyword",
        }
    }

    /// Matching priority, 1 (lowest) to 5 (highest).
    pub fn priority(&self) -> u8 {
        match self {
            StitchKey::Sha1 | StitchKey::Sha256 | StitchKey::ActiveMoiety => 5,
            StitchKey::Md5 => 4,
            StitchKey::Unii | StitchKey::InchiKey | StitchKey::LychiL5 => 3,
            StitchKey::Name
            | StitchKey::Cas
            | StitchKey::Cid
            | StitchKey::Chembl
            | StitchKey::DrugBank
            | StitchKey::Mesh
            | StitchKey::UniProt
            | StitchKey::Pmid
            | StitchKey::LychiL4 => 2,
            _ => 1,
        }
    }

    pub fn value_kind(&self) -> ValueKind {
        match self {
            StitchKey::Sid | StitchKey::Cid | StitchKey::Pmid | StitchKey::AnyId => {
                ValueKind::Integer
            }
            _ => ValueKind::Text,
        }
    }

    pub fn is_directed(&self) -> bool {
        matches!(self, StitchKey::ActiveMoiety)
    }

    /// Keys whose priority lies in `[lower, upper]`. A bound of zero or
    /// less leaves that side open.
    pub fn keys(lower: i32, upper: i32) -> Vec<StitchKey> {
        Self::ALL
            .iter()
            .copied()
            .filter(|k| {
                let p = k.priority() as i32;
                (lower <= 0 || p >= lower) && (upper <= 0 || p <= upper)
            })
            .collect()
    }

    /// All keys ordered by descending priority, declaration order within a
    /// priority level.
    pub fn by_priority() -> Vec<StitchKey> {
        let mut keys = Self::ALL.to_vec();
        keys.sort_by_key(|k| std::cmp::Reverse(k.priority()));
        keys
    }

    fn family(&self) -> Family {
        match self.as_str().as_bytes()[0] {
            b'N' => Family::Name,
            b'I' => Family::Identifier,
            b'H' => Family::Hash,
            b'U' => Family::Url,
            _ => Family::Term,
        }
    }

    /// Canonical form of a raw value under this key, or `None` when nothing
    /// matchable remains. Idempotent: normalizing a normalized value returns
    /// it unchanged.
    pub fn normalize(&self, raw: &str) -> Option<String> {
        let value = match self.family() {
            Family::Name => collapse(&raw.to_uppercase().replace(|c: char| !c.is_alphanumeric(), " ")),
            Family::Identifier => {
                let trimmed = raw.trim().trim_matches(|c| c == '"' || c == '\'');
                match self.value_kind() {
                    ValueKind::Integer => trimmed.trim().parse::<u64>().ok()?.to_string(),
                    ValueKind::Text => trimmed
                        .chars()
                        .filter(|c| !c.is_whitespace() && *c != '"' && *c != '\'')
                        .collect::<String>()
                        .to_uppercase(),
                }
            }
            Family::Hash => raw
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .to_uppercase(),
            Family::Url => raw
                .trim_start()
                .trim_end_matches(|c: char| c == '/' || c.is_whitespace())
                .to_string(),
            Family::Term => collapse(&raw.to_lowercase()),
        };

        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    }
}

fn collapse(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl fmt::Display for StitchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StitchKey {
    type Err = StitchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| StitchError::UnknownStitchKey(s.to_string()))
    }
}
