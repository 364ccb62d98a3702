use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::PeelError;

const MINIMAL_FIELDS: &str = "accession";
const RICH_FIELDS: &str = "accession,reviewed,id,gene_names,organism_name,cc_subcellular_location";

const SURFACE_TERMS: &str = "((cc_scl_term:SL-0112) OR (cc_scl_term:SL-0243) OR (keyword:KW-0732) OR (cc_scl_term:SL-9906) OR (cc_scl_term:SL-9907))";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
pub enum Compartment {
    #[value(name = "cs")]
    #[serde(rename = "cs")]
    CellSurface,
    #[value(name = "mt")]
    #[serde(rename = "mt")]
    Mitochondria,
    #[value(name = "nu")]
    #[serde(rename = "nu")]
    Nucleus,
}

impl Compartment {
    pub fn code(&self) -> &'static str {
        match self {
            Compartment::CellSurface => "cs",
            Compartment::Mitochondria => "mt",
            Compartment::Nucleus => "nu",
        }
    }

    pub fn long_name(&self) -> &'static str {
        match self {
            Compartment::CellSurface => "cell surface",
            Compartment::Mitochondria => "mitochondria",
            Compartment::Nucleus => "nucleus",
        }
    }

    /// UniProt query expression selecting the reviewed entries of one set.
    pub fn query(&self, kind: AnnotationKind) -> String {
        match (self, kind) {
            (Compartment::CellSurface, AnnotationKind::TruePositive) => {
                format!("({SURFACE_TERMS} AND (reviewed:true))")
            }
            (Compartment::CellSurface, AnnotationKind::FalsePositive) => format!(
                "((((cc_scl_term:SL-0091) OR (cc_scl_term:SL-0173) OR (cc_scl_term:SL-0191)) AND (reviewed:true)) NOT ({SURFACE_TERMS} AND (reviewed:true)))"
            ),
            (Compartment::Mitochondria, AnnotationKind::TruePositive) => {
                "((cc_scl_term:SL-0173) AND (reviewed:true))".to_string()
            }
            (Compartment::Mitochondria, AnnotationKind::FalsePositive) => format!(
                "((((cc_scl_term:SL-0091) OR (cc_scl_term:SL-0191) OR {}) AND (reviewed:true)) NOT ((cc_scl_term:SL-0173) AND (reviewed:true)))",
                surface_terms_inner()
            ),
            (Compartment::Nucleus, AnnotationKind::TruePositive) => {
                "((cc_scl_term:SL-0191) AND (reviewed:true))".to_string()
            }
            (Compartment::Nucleus, AnnotationKind::FalsePositive) => format!(
                "((((cc_scl_term:SL-0091) OR (cc_scl_term:SL-0173) OR {}) AND (reviewed:true)) NOT ((cc_scl_term:SL-0191) AND (reviewed:true)))",
                surface_terms_inner()
            ),
        }
    }

    /// Full search URL for one annotation set. `rich` asks for descriptive
    /// fields worth archiving instead of the accession alone.
    pub fn search_url(&self, api_url: &str, kind: AnnotationKind, rich: bool) -> String {
        let fields = if rich { RICH_FIELDS } else { MINIMAL_FIELDS };
        format!(
            "{api_url}/uniprotkb/search?compressed=true&size=500&format=tsv&fields={fields}&query={}",
            self.query(kind)
        )
    }
}

// The surface terms without their enclosing parentheses, for OR-lists.
fn surface_terms_inner() -> &'static str {
    &SURFACE_TERMS[1..SURFACE_TERMS.len() - 1]
}

impl fmt::Display for Compartment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Compartment {
    type Err = PeelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "cs" => Ok(Compartment::CellSurface),
            "mt" => Ok(Compartment::Mitochondria),
            "nu" => Ok(Compartment::Nucleus),
            _ => Err(PeelError::UnknownCompartment(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnnotationKind {
    TruePositive,
    FalsePositive,
}

impl AnnotationKind {
    pub fn label(&self) -> &'static str {
        match self {
            AnnotationKind::TruePositive => "true_positive",
            AnnotationKind::FalsePositive => "false_positive",
        }
    }

    pub fn file_name(&self) -> String {
        format!("annotation_{}.tsv", self.label())
    }
}

impl fmt::Display for AnnotationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}
