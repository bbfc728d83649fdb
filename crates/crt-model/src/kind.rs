//! Target resource kinds.
//!
//! The set is closed: a reference can only point at one of these kinds, and
//! the names double as the prefix of the encoded reference form.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ModelError;

/// Kind of record a reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Patient,
    Practitioner,
    PractitionerRole,
    Organization,
    Location,
    EpisodeOfCare,
    Encounter,
    Observation,
    Condition,
    Procedure,
    ProcedureRequest,
    ReferralRequest,
    MedicationStatement,
    MedicationOrder,
    AllergyIntolerance,
    Immunization,
    FamilyMemberHistory,
    DiagnosticReport,
    Appointment,
    Schedule,
    Slot,
}

impl ResourceKind {
    /// All kinds in declaration order.
    pub const ALL: [ResourceKind; 21] = [
        ResourceKind::Patient,
        ResourceKind::Practitioner,
        ResourceKind::PractitionerRole,
        ResourceKind::Organization,
        ResourceKind::Location,
        ResourceKind::EpisodeOfCare,
        ResourceKind::Encounter,
        ResourceKind::Observation,
        ResourceKind::Condition,
        ResourceKind::Procedure,
        ResourceKind::ProcedureRequest,
        ResourceKind::ReferralRequest,
        ResourceKind::MedicationStatement,
        ResourceKind::MedicationOrder,
        ResourceKind::AllergyIntolerance,
        ResourceKind::Immunization,
        ResourceKind::FamilyMemberHistory,
        ResourceKind::DiagnosticReport,
        ResourceKind::Appointment,
        ResourceKind::Schedule,
        ResourceKind::Slot,
    ];

    /// Returns the canonical name used in encoded references.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Patient => "Patient",
            ResourceKind::Practitioner => "Practitioner",
            ResourceKind::PractitionerRole => "PractitionerRole",
            ResourceKind::Organization => "Organization",
            ResourceKind::Location => "Location",
            ResourceKind::EpisodeOfCare => "EpisodeOfCare",
            ResourceKind::Encounter => "Encounter",
            ResourceKind::Observation => "Observation",
            ResourceKind::Condition => "Condition",
            ResourceKind::Procedure => "Procedure",
            ResourceKind::ProcedureRequest => "ProcedureRequest",
            ResourceKind::ReferralRequest => "ReferralRequest",
            ResourceKind::MedicationStatement => "MedicationStatement",
            ResourceKind::MedicationOrder => "MedicationOrder",
            ResourceKind::AllergyIntolerance => "AllergyIntolerance",
            ResourceKind::Immunization => "Immunization",
            ResourceKind::FamilyMemberHistory => "FamilyMemberHistory",
            ResourceKind::DiagnosticReport => "DiagnosticReport",
            ResourceKind::Appointment => "Appointment",
            ResourceKind::Schedule => "Schedule",
            ResourceKind::Slot => "Slot",
        }
    }

    /// Returns true for kinds that describe people or places rather than
    /// clinical events.
    pub fn is_administrative(&self) -> bool {
        matches!(
            self,
            ResourceKind::Patient
                | ResourceKind::Practitioner
                | ResourceKind::PractitionerRole
                | ResourceKind::Organization
                | ResourceKind::Location
                | ResourceKind::Schedule
                | ResourceKind::Slot
        )
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = ModelError;

    /// Parses a kind name, ignoring case and surrounding whitespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        ResourceKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| ModelError::UnknownResourceKind {
                name: s.to_string(),
            })
    }
}
