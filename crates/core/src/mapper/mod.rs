//! Entity mapper: spreadsheet rows to internal entities and back.
//!
//! Everything here is pure. A row either maps to exactly one entity or
//! fails with a [`MappingError`] naming the offending column.

pub mod coerce;
pub mod rows;

use std::collections::BTreeMap;

use serde_json::Value;

use crate::entities::{
    Attendee, AttendeeRole, InternalEntity, Opportunity, OpportunityKind, Partner, Project,
    ProjectStage, Session, SessionType,
};
use crate::errors::MappingError;
use crate::models::SyncType;
use crate::sheets::{OutboundRow, SheetRow};

pub use rows::{columns, key_column, known_columns, Column, ExternalRow};
use rows::{AttendeeRow, OpportunityRow, PartnerRow, ProjectRow, SessionRow};

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Map a decoded row to its internal entity.
pub fn map(row: &ExternalRow) -> Result<InternalEntity, MappingError> {
    match row {
        ExternalRow::Session(r) => map_session(r).map(InternalEntity::Session),
        ExternalRow::Project(r) => map_project(r).map(InternalEntity::Project),
        ExternalRow::Opportunity(r) => map_opportunity(r).map(InternalEntity::Opportunity),
        ExternalRow::Partner(r) => map_partner(r).map(InternalEntity::Partner),
        ExternalRow::Attendee(r) => map_attendee(r).map(InternalEntity::Attendee),
    }
}

/// Decode and map a vendor row in one step.
pub fn map_sheet_row(sync_type: SyncType, row: &SheetRow) -> Result<InternalEntity, MappingError> {
    map(&ExternalRow::decode(sync_type, row))
}

pub fn natural_key_of(sync_type: SyncType, row: &SheetRow) -> Option<String> {
    ExternalRow::decode(sync_type, row).natural_key()
}

/// Reference recorded in the failure ledger: the natural key when the row
/// has one, otherwise the vendor row id.
pub fn external_ref(sync_type: SyncType, row: &SheetRow) -> String {
    natural_key_of(sync_type, row).unwrap_or_else(|| format!("row:{}", row.row_id))
}

fn require(value: &Option<String>, column: &Column) -> Result<String, MappingError> {
    value
        .clone()
        .ok_or_else(|| MappingError::missing(column.title))
}

fn map_session(r: &SessionRow) -> Result<Session, MappingError> {
    use columns::session::*;

    let session_id = require(&r.session_id, &SESSION_ID)?;
    let title = require(&r.title, &TITLE)?;
    let start = require(&r.start, &START)?;
    let starts_at = coerce::parse_datetime(START.title, &start)?;
    let ends_at = r
        .end
        .as_deref()
        .map(|s| coerce::parse_datetime(END.title, s))
        .transpose()?;
    if let Some(end) = ends_at {
        if end < starts_at {
            return Err(MappingError::new(END.title, "ends before the session starts"));
        }
    }
    let session_type = match r.session_type.as_deref() {
        Some(s) => coerce::parse_enum(SESSION_TYPE.title, s, SessionType::from_normalized)?,
        None => SessionType::Other,
    };
    let capacity = r
        .capacity
        .as_deref()
        .map(|s| coerce::parse_count(CAPACITY.title, s))
        .transpose()?;
    let requires_rsvp = r
        .requires_rsvp
        .as_deref()
        .map(|s| coerce::parse_bool(REQUIRES_RSVP.title, s))
        .transpose()?
        .unwrap_or(false);

    Ok(Session {
        session_id,
        title,
        description: r.description.clone(),
        starts_at,
        ends_at,
        location: r.location.clone(),
        speakers: r.speakers.as_deref().map(coerce::split_list).unwrap_or_default(),
        session_type,
        capacity,
        requires_rsvp,
    })
}

fn map_project(r: &ProjectRow) -> Result<Project, MappingError> {
    use columns::project::*;

    let stage = match r.stage.as_deref() {
        Some(s) => coerce::parse_enum(STAGE.title, s, ProjectStage::from_normalized)?,
        None => ProjectStage::Concept,
    };
    let seeking_partnership = r
        .seeking_partnership
        .as_deref()
        .map(|s| coerce::parse_bool(SEEKING_PARTNERSHIP.title, s))
        .transpose()?
        .unwrap_or(false);

    Ok(Project {
        project_id: require(&r.project_id, &PROJECT_ID)?,
        title: require(&r.title, &TITLE)?,
        description: r.description.clone(),
        department: r.department.clone(),
        stage,
        faculty_lead: r.faculty_lead.clone(),
        students: r.students.as_deref().map(coerce::split_list).unwrap_or_default(),
        keywords: r.keywords.as_deref().map(coerce::split_list).unwrap_or_default(),
        seeking_partnership,
    })
}

fn map_opportunity(r: &OpportunityRow) -> Result<Opportunity, MappingError> {
    use columns::opportunity::*;

    let opportunity_id = require(&r.opportunity_id, &OPPORTUNITY_ID)?;
    let title = require(&r.title, &TITLE)?;
    let kind_text = require(&r.kind, &KIND)?;
    let kind = coerce::parse_enum(KIND.title, &kind_text, OpportunityKind::from_normalized)?;

    Ok(Opportunity {
        opportunity_id,
        title,
        sponsor: r.sponsor.clone(),
        kind,
        description: r.description.clone(),
        deadline: r
            .deadline
            .as_deref()
            .map(|s| coerce::parse_date(DEADLINE.title, s))
            .transpose()?,
        amount_usd: r
            .amount
            .as_deref()
            .map(|s| coerce::parse_amount(AMOUNT.title, s))
            .transpose()?,
        url: r
            .url
            .as_deref()
            .map(|s| coerce::parse_url(URL.title, s))
            .transpose()?,
    })
}

fn map_partner(r: &PartnerRow) -> Result<Partner, MappingError> {
    use columns::partner::*;

    let organization = require(&r.organization, &ORGANIZATION)?;
    let partner_key = coerce::slugify(&organization);
    if partner_key.is_empty() {
        return Err(MappingError::new(
            ORGANIZATION.title,
            "name has no letters or digits",
        ));
    }

    Ok(Partner {
        partner_key,
        organization,
        website: r
            .website
            .as_deref()
            .map(|s| coerce::parse_url(WEBSITE.title, s))
            .transpose()?,
        description: r.description.clone(),
        focus_areas: r.focus_areas.as_deref().map(coerce::split_list).unwrap_or_default(),
        poc_name: r.poc_name.clone(),
        poc_email: r
            .poc_email
            .as_deref()
            .map(|s| coerce::parse_email(POC_EMAIL.title, s))
            .transpose()?,
        interests: r.interests.as_deref().map(coerce::split_list).unwrap_or_default(),
    })
}

fn map_attendee(r: &AttendeeRow) -> Result<Attendee, MappingError> {
    use columns::attendee::*;

    let email_text = require(&r.email, &EMAIL)?;
    let email = coerce::parse_email(EMAIL.title, &email_text)?;

    // Registration exports often split the name in two.
    let full_name = match &r.full_name {
        Some(name) => name.clone(),
        None => {
            let joined = [r.first_name.as_deref(), r.last_name.as_deref()]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ");
            if joined.is_empty() {
                return Err(MappingError::missing(FULL_NAME.title));
            }
            joined
        }
    };

    let role = match r.role.as_deref() {
        Some(s) => coerce::parse_enum(ROLE.title, s, AttendeeRole::from_normalized)?,
        None => AttendeeRole::Other,
    };

    Ok(Attendee {
        email,
        full_name,
        organization: r.organization.clone(),
        role,
        title: r.title.clone(),
        checked_in: r
            .checked_in
            .as_deref()
            .map(|s| coerce::parse_bool(CHECKED_IN.title, s))
            .transpose()?
            .unwrap_or(false),
    })
}

// ---------------------------------------------------------------------------
// Reverse mapping
// ---------------------------------------------------------------------------

fn text(value: &Option<String>) -> Value {
    Value::String(value.clone().unwrap_or_default())
}

fn list(values: &[String]) -> Value {
    Value::String(values.join(", "))
}

/// Sheet cells for `entity`, keyed by canonical column title. Absent values
/// are written as empty text so they clear the cell.
pub fn to_cells(entity: &InternalEntity) -> BTreeMap<String, Value> {
    let mut cells = BTreeMap::new();
    let mut put = |column: Column, value: Value| {
        cells.insert(column.title.to_string(), value);
    };

    match entity {
        InternalEntity::Session(s) => {
            use columns::session::*;
            put(SESSION_ID, Value::String(s.session_id.clone()));
            put(TITLE, Value::String(s.title.clone()));
            put(DESCRIPTION, text(&s.description));
            put(START, Value::String(s.starts_at.format(DATETIME_FORMAT).to_string()));
            put(
                END,
                text(&s.ends_at.map(|e| e.format(DATETIME_FORMAT).to_string())),
            );
            put(LOCATION, text(&s.location));
            put(SPEAKERS, list(&s.speakers));
            put(SESSION_TYPE, Value::String(s.session_type.as_str().to_string()));
            put(CAPACITY, s.capacity.map(Value::from).unwrap_or(Value::String(String::new())));
            put(REQUIRES_RSVP, Value::Bool(s.requires_rsvp));
        }
        InternalEntity::Project(p) => {
            use columns::project::*;
            put(PROJECT_ID, Value::String(p.project_id.clone()));
            put(TITLE, Value::String(p.title.clone()));
            put(DESCRIPTION, text(&p.description));
            put(DEPARTMENT, text(&p.department));
            put(STAGE, Value::String(p.stage.as_str().to_string()));
            put(FACULTY_LEAD, text(&p.faculty_lead));
            put(STUDENTS, list(&p.students));
            put(KEYWORDS, list(&p.keywords));
            put(SEEKING_PARTNERSHIP, Value::Bool(p.seeking_partnership));
        }
        InternalEntity::Opportunity(o) => {
            use columns::opportunity::*;
            put(OPPORTUNITY_ID, Value::String(o.opportunity_id.clone()));
            put(TITLE, Value::String(o.title.clone()));
            put(SPONSOR, text(&o.sponsor));
            put(KIND, Value::String(o.kind.as_str().to_string()));
            put(DESCRIPTION, text(&o.description));
            put(
                DEADLINE,
                text(&o.deadline.map(|d| d.format(DATE_FORMAT).to_string())),
            );
            put(AMOUNT, o.amount_usd.map(Value::from).unwrap_or(Value::String(String::new())));
            put(URL, text(&o.url));
        }
        InternalEntity::Partner(p) => {
            use columns::partner::*;
            put(ORGANIZATION, Value::String(p.organization.clone()));
            put(WEBSITE, text(&p.website));
            put(DESCRIPTION, text(&p.description));
            put(FOCUS_AREAS, list(&p.focus_areas));
            put(POC_NAME, text(&p.poc_name));
            put(POC_EMAIL, text(&p.poc_email));
            put(INTERESTS, list(&p.interests));
        }
        InternalEntity::Attendee(a) => {
            use columns::attendee::*;
            put(EMAIL, Value::String(a.email.clone()));
            put(FULL_NAME, Value::String(a.full_name.clone()));
            put(ORGANIZATION, text(&a.organization));
            put(ROLE, Value::String(a.role.as_str().to_string()));
            put(TITLE, text(&a.title));
            put(CHECKED_IN, Value::Bool(a.checked_in));
        }
    }
    cells
}

/// The row to push outward for `entity`.
pub fn to_outbound(entity: &InternalEntity) -> OutboundRow {
    OutboundRow {
        natural_key: entity.natural_key().to_string(),
        key_column: key_column(entity.sync_type()).to_string(),
        cells: to_cells(entity),
    }
}
