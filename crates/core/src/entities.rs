//! Internal entity shapes stored by the application.
//!
//! Each entity carries the natural key that ties it to its spreadsheet row;
//! nothing else about the sheet is kept.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::models::SyncType;

// ---------------------------------------------------------------------------
// Enumerated values
// ---------------------------------------------------------------------------

/// Format of a scheduled session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    Keynote,
    Panel,
    Workshop,
    Presentation,
    Demo,
    Networking,
    Other,
}

impl SessionType {
    /// Parse an already-normalized (lowercase, `_`-separated) value.
    pub fn from_normalized(s: &str) -> Option<Self> {
        match s {
            "keynote" | "plenary" => Some(Self::Keynote),
            "panel" | "panel_discussion" => Some(Self::Panel),
            "workshop" | "breakout" | "hands_on" => Some(Self::Workshop),
            "presentation" | "talk" | "briefing" => Some(Self::Presentation),
            "demo" | "demonstration" => Some(Self::Demo),
            "networking" | "reception" | "social" => Some(Self::Networking),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keynote => "Keynote",
            Self::Panel => "Panel",
            Self::Workshop => "Workshop",
            Self::Presentation => "Presentation",
            Self::Demo => "Demo",
            Self::Networking => "Networking",
            Self::Other => "Other",
        }
    }
}

/// Maturity of a faculty/student project.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStage {
    Concept,
    Research,
    Prototype,
    Pilot,
    Deployed,
}

impl ProjectStage {
    pub fn from_normalized(s: &str) -> Option<Self> {
        match s {
            "concept" | "idea" | "ideation" => Some(Self::Concept),
            "research" | "basic_research" | "applied_research" => Some(Self::Research),
            "prototype" | "prototyping" | "development" => Some(Self::Prototype),
            "pilot" | "testing" | "field_testing" => Some(Self::Pilot),
            "deployed" | "fielded" | "transition" | "transitioned" => Some(Self::Deployed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Concept => "Concept",
            Self::Research => "Research",
            Self::Prototype => "Prototype",
            Self::Pilot => "Pilot",
            Self::Deployed => "Deployed",
        }
    }
}

/// Kind of funding or collaboration opportunity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityKind {
    Funding,
    Internship,
    ResearchCollaboration,
    Competition,
    Fellowship,
}

impl OpportunityKind {
    pub fn from_normalized(s: &str) -> Option<Self> {
        match s {
            "funding" | "grant" | "baa" => Some(Self::Funding),
            "internship" | "intern" => Some(Self::Internship),
            "research_collaboration" | "collaboration" | "research" | "crada" => {
                Some(Self::ResearchCollaboration)
            }
            "competition" | "challenge" | "prize" => Some(Self::Competition),
            "fellowship" | "scholarship" => Some(Self::Fellowship),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Funding => "Funding",
            Self::Internship => "Internship",
            Self::ResearchCollaboration => "Research Collaboration",
            Self::Competition => "Competition",
            Self::Fellowship => "Fellowship",
        }
    }
}

/// Registration category of an attendee.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttendeeRole {
    Student,
    Faculty,
    Staff,
    Industry,
    Military,
    Government,
    Other,
}

impl AttendeeRole {
    pub fn from_normalized(s: &str) -> Option<Self> {
        match s {
            "student" | "graduate_student" => Some(Self::Student),
            "faculty" | "professor" | "researcher" => Some(Self::Faculty),
            "staff" => Some(Self::Staff),
            "industry" | "industry_partner" | "partner" | "vendor" => Some(Self::Industry),
            "military" | "active_duty" => Some(Self::Military),
            "government" | "civilian" | "government_civilian" => Some(Self::Government),
            "other" | "guest" => Some(Self::Other),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Student => "Student",
            Self::Faculty => "Faculty",
            Self::Staff => "Staff",
            Self::Industry => "Industry",
            Self::Military => "Military",
            Self::Government => "Government",
            Self::Other => "Other",
        }
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub session_id: String,
    pub title: String,
    pub description: Option<String>,
    pub starts_at: NaiveDateTime,
    pub ends_at: Option<NaiveDateTime>,
    pub location: Option<String>,
    pub speakers: Vec<String>,
    pub session_type: SessionType,
    pub capacity: Option<u32>,
    pub requires_rsvp: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Project {
    pub project_id: String,
    pub title: String,
    pub description: Option<String>,
    pub department: Option<String>,
    pub stage: ProjectStage,
    pub faculty_lead: Option<String>,
    pub students: Vec<String>,
    pub keywords: Vec<String>,
    pub seeking_partnership: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Opportunity {
    pub opportunity_id: String,
    pub title: String,
    pub sponsor: Option<String>,
    pub kind: OpportunityKind,
    pub description: Option<String>,
    pub deadline: Option<NaiveDate>,
    pub amount_usd: Option<u64>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Partner {
    /// Slug of the organization name.
    pub partner_key: String,
    pub organization: String,
    pub website: Option<String>,
    pub description: Option<String>,
    pub focus_areas: Vec<String>,
    pub poc_name: Option<String>,
    pub poc_email: Option<String>,
    pub interests: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attendee {
    /// Lowercased; doubles as the natural key.
    pub email: String,
    pub full_name: String,
    pub organization: Option<String>,
    pub role: AttendeeRole,
    pub title: Option<String>,
    pub checked_in: bool,
}

/// Any internal entity, tagged by its data type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InternalEntity {
    Session(Session),
    Project(Project),
    Opportunity(Opportunity),
    Partner(Partner),
    Attendee(Attendee),
}

impl InternalEntity {
    pub fn sync_type(&self) -> SyncType {
        match self {
            Self::Session(_) => SyncType::Sessions,
            Self::Project(_) => SyncType::Projects,
            Self::Opportunity(_) => SyncType::Opportunities,
            Self::Partner(_) => SyncType::Partners,
            Self::Attendee(_) => SyncType::Attendees,
        }
    }

    pub fn natural_key(&self) -> &str {
        match self {
            Self::Session(s) => &s.session_id,
            Self::Project(p) => &p.project_id,
            Self::Opportunity(o) => &o.opportunity_id,
            Self::Partner(p) => &p.partner_key,
            Self::Attendee(a) => &a.email,
        }
    }

    /// JSON body persisted in the `entities` table.
    pub fn to_payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Self::Session(s) => serde_json::to_value(s),
            Self::Project(p) => serde_json::to_value(p),
            Self::Opportunity(o) => serde_json::to_value(o),
            Self::Partner(p) => serde_json::to_value(p),
            Self::Attendee(a) => serde_json::to_value(a),
        }
    }

    pub fn from_payload(
        sync_type: SyncType,
        payload: serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        Ok(match sync_type {
            SyncType::Sessions => Self::Session(serde_json::from_value(payload)?),
            SyncType::Projects => Self::Project(serde_json::from_value(payload)?),
            SyncType::Opportunities => Self::Opportunity(serde_json::from_value(payload)?),
            SyncType::Partners => Self::Partner(serde_json::from_value(payload)?),
            SyncType::Attendees => Self::Attendee(serde_json::from_value(payload)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_restores_entity() {
        let entity = InternalEntity::Attendee(Attendee {
            email: "ana@nps.edu".into(),
            full_name: "Ana Ruiz".into(),
            organization: Some("NPS".into()),
            role: AttendeeRole::Faculty,
            title: None,
            checked_in: false,
        });
        let payload = entity.to_payload().unwrap();
        assert_eq!(payload["role"], "faculty");
        let restored = InternalEntity::from_payload(SyncType::Attendees, payload).unwrap();
        assert_eq!(restored, entity);
        assert_eq!(restored.natural_key(), "ana@nps.edu");
    }

    #[test]
    fn test_payload_of_wrong_type_is_rejected() {
        let payload = serde_json::json!({ "email": "x@y.z" });
        assert!(InternalEntity::from_payload(SyncType::Sessions, payload).is_err());
    }

    #[test]
    fn test_enum_aliases() {
        assert_eq!(SessionType::from_normalized("talk"), Some(SessionType::Presentation));
        assert_eq!(ProjectStage::from_normalized("fielded"), Some(ProjectStage::Deployed));
        assert_eq!(
            OpportunityKind::from_normalized("crada"),
            Some(OpportunityKind::ResearchCollaboration)
        );
        assert_eq!(AttendeeRole::from_normalized("active_duty"), Some(AttendeeRole::Military));
        assert_eq!(AttendeeRole::from_normalized("alien"), None);
    }
}
