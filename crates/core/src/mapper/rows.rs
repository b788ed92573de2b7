//! Typed views over vendor rows.
//!
//! A [`SheetRow`] is decoded by column title into one [`ExternalRow`]
//! variant per data type. Decoding never fails: every field is optional
//! text, and validation happens in the mapper.

use crate::models::SyncType;
use crate::sheets::SheetRow;

use super::coerce;

/// A spreadsheet column: canonical title plus accepted aliases.
#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub title: &'static str,
    pub aliases: &'static [&'static str],
}

impl Column {
    const fn new(title: &'static str, aliases: &'static [&'static str]) -> Self {
        Self { title, aliases }
    }

    /// Trimmed text of the first non-blank cell matching the title or an
    /// alias.
    pub fn read(&self, row: &SheetRow) -> Option<String> {
        std::iter::once(self.title)
            .chain(self.aliases.iter().copied())
            .filter_map(|title| row.get(title))
            .find_map(crate::sheets::cell_text)
    }

    /// Whether a sheet column titled `title` is read as this column.
    pub fn matches(&self, title: &str) -> bool {
        let title = title.trim();
        std::iter::once(self.title)
            .chain(self.aliases.iter().copied())
            .any(|t| t.eq_ignore_ascii_case(title))
    }
}

pub mod columns {
    use super::Column;

    pub mod session {
        use super::Column;
        pub const SESSION_ID: Column = Column::new("Session ID", &["Session Id", "Session #", "ID"]);
        pub const TITLE: Column = Column::new("Title", &["Session Title", "Session Name", "Name"]);
        pub const DESCRIPTION: Column =
            Column::new("Description", &["Abstract", "Session Description"]);
        pub const START: Column = Column::new("Start", &["Start Time", "Start Date/Time", "Starts"]);
        pub const END: Column = Column::new("End", &["End Time", "End Date/Time", "Ends"]);
        pub const LOCATION: Column = Column::new("Location", &["Room", "Venue"]);
        pub const SPEAKERS: Column =
            Column::new("Speakers", &["Speaker", "Speaker(s)", "Presenters"]);
        pub const SESSION_TYPE: Column = Column::new("Session Type", &["Type", "Format"]);
        pub const CAPACITY: Column = Column::new("Capacity", &["Max Attendees", "Seats"]);
        pub const REQUIRES_RSVP: Column =
            Column::new("Requires RSVP", &["RSVP Required", "Registration Required"]);
    }

    pub mod project {
        use super::Column;
        pub const PROJECT_ID: Column = Column::new("Project ID", &["Project Id", "Project #", "ID"]);
        pub const TITLE: Column = Column::new("Project Title", &["Title", "Project Name"]);
        pub const DESCRIPTION: Column =
            Column::new("Description", &["Abstract", "Project Description", "Summary"]);
        pub const DEPARTMENT: Column = Column::new("Department", &["Dept", "School"]);
        pub const STAGE: Column = Column::new("Stage", &["Project Stage", "Maturity"]);
        pub const FACULTY_LEAD: Column =
            Column::new("Faculty Lead", &["PI", "Principal Investigator", "Advisor"]);
        pub const STUDENTS: Column = Column::new("Students", &["Student Team", "Team Members"]);
        pub const KEYWORDS: Column = Column::new("Keywords", &["Research Areas", "Tags"]);
        pub const SEEKING_PARTNERSHIP: Column = Column::new(
            "Seeking Partnership",
            &["Seeking Industry Partner", "Open to Collaboration"],
        );
    }

    pub mod opportunity {
        use super::Column;
        pub const OPPORTUNITY_ID: Column =
            Column::new("Opportunity ID", &["Opportunity Id", "ID"]);
        pub const TITLE: Column =
            Column::new("Title", &["Opportunity", "Opportunity Title", "Name"]);
        pub const SPONSOR: Column =
            Column::new("Sponsor", &["Sponsoring Organization", "Organization", "Agency"]);
        pub const KIND: Column = Column::new("Type", &["Opportunity Type", "Category"]);
        pub const DESCRIPTION: Column = Column::new("Description", &["Details"]);
        pub const DEADLINE: Column = Column::new("Deadline", &["Due Date", "Closing Date"]);
        pub const AMOUNT: Column = Column::new("Amount", &["Funding Amount", "Award Amount"]);
        pub const URL: Column = Column::new("Link", &["URL", "Website", "More Info"]);
    }

    pub mod partner {
        use super::Column;
        pub const ORGANIZATION: Column =
            Column::new("Organization", &["Company", "Company Name", "Organization Name"]);
        pub const WEBSITE: Column = Column::new("Website", &["Company Website", "URL"]);
        pub const DESCRIPTION: Column =
            Column::new("Description", &["Company Description", "About"]);
        pub const FOCUS_AREAS: Column = Column::new(
            "Technology Focus Areas",
            &["Focus Areas", "Technology Areas"],
        );
        pub const POC_NAME: Column =
            Column::new("Point of Contact", &["POC Name", "Contact Name"]);
        pub const POC_EMAIL: Column = Column::new("POC Email", &["Contact Email", "Email"]);
        pub const INTERESTS: Column = Column::new(
            "Partnership Interests",
            &["Collaboration Interests", "Interests"],
        );
    }

    pub mod attendee {
        use super::Column;
        pub const EMAIL: Column = Column::new("Email", &["Email Address", "E-mail"]);
        pub const FULL_NAME: Column = Column::new("Full Name", &["Name", "Attendee Name"]);
        pub const FIRST_NAME: Column = Column::new("First Name", &["Given Name"]);
        pub const LAST_NAME: Column = Column::new("Last Name", &["Surname", "Family Name"]);
        pub const ORGANIZATION: Column =
            Column::new("Organization", &["Company", "Affiliation"]);
        pub const ROLE: Column = Column::new(
            "Role",
            &["Attendee Type", "Participant Type", "Registration Type"],
        );
        pub const TITLE: Column = Column::new("Title", &["Job Title", "Position", "Rank/Title"]);
        pub const CHECKED_IN: Column = Column::new("Checked In", &["Check-In", "Attended"]);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionRow {
    pub session_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub location: Option<String>,
    pub speakers: Option<String>,
    pub session_type: Option<String>,
    pub capacity: Option<String>,
    pub requires_rsvp: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectRow {
    pub project_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub department: Option<String>,
    pub stage: Option<String>,
    pub faculty_lead: Option<String>,
    pub students: Option<String>,
    pub keywords: Option<String>,
    pub seeking_partnership: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpportunityRow {
    pub opportunity_id: Option<String>,
    pub title: Option<String>,
    pub sponsor: Option<String>,
    pub kind: Option<String>,
    pub description: Option<String>,
    pub deadline: Option<String>,
    pub amount: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartnerRow {
    pub organization: Option<String>,
    pub website: Option<String>,
    pub description: Option<String>,
    pub focus_areas: Option<String>,
    pub poc_name: Option<String>,
    pub poc_email: Option<String>,
    pub interests: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttendeeRow {
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub organization: Option<String>,
    pub role: Option<String>,
    pub title: Option<String>,
    pub checked_in: Option<String>,
}

/// A vendor row decoded into the shape of its data type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalRow {
    Session(SessionRow),
    Project(ProjectRow),
    Opportunity(OpportunityRow),
    Partner(PartnerRow),
    Attendee(AttendeeRow),
}

impl ExternalRow {
    pub fn decode(sync_type: SyncType, row: &SheetRow) -> Self {
        match sync_type {
            SyncType::Sessions => {
                use columns::session::*;
                Self::Session(SessionRow {
                    session_id: SESSION_ID.read(row),
                    title: TITLE.read(row),
                    description: DESCRIPTION.read(row),
                    start: START.read(row),
                    end: END.read(row),
                    location: LOCATION.read(row),
                    speakers: SPEAKERS.read(row),
                    session_type: SESSION_TYPE.read(row),
                    capacity: CAPACITY.read(row),
                    requires_rsvp: REQUIRES_RSVP.read(row),
                })
            }
            SyncType::Projects => {
                use columns::project::*;
                Self::Project(ProjectRow {
                    project_id: PROJECT_ID.read(row),
                    title: TITLE.read(row),
                    description: DESCRIPTION.read(row),
                    department: DEPARTMENT.read(row),
                    stage: STAGE.read(row),
                    faculty_lead: FACULTY_LEAD.read(row),
                    students: STUDENTS.read(row),
                    keywords: KEYWORDS.read(row),
                    seeking_partnership: SEEKING_PARTNERSHIP.read(row),
                })
            }
            SyncType::Opportunities => {
                use columns::opportunity::*;
                Self::Opportunity(OpportunityRow {
                    opportunity_id: OPPORTUNITY_ID.read(row),
                    title: TITLE.read(row),
                    sponsor: SPONSOR.read(row),
                    kind: KIND.read(row),
                    description: DESCRIPTION.read(row),
                    deadline: DEADLINE.read(row),
                    amount: AMOUNT.read(row),
                    url: URL.read(row),
                })
            }
            SyncType::Partners => {
                use columns::partner::*;
                Self::Partner(PartnerRow {
                    organization: ORGANIZATION.read(row),
                    website: WEBSITE.read(row),
                    description: DESCRIPTION.read(row),
                    focus_areas: FOCUS_AREAS.read(row),
                    poc_name: POC_NAME.read(row),
                    poc_email: POC_EMAIL.read(row),
                    interests: INTERESTS.read(row),
                })
            }
            SyncType::Attendees => {
                use columns::attendee::*;
                Self::Attendee(AttendeeRow {
                    email: EMAIL.read(row),
                    full_name: FULL_NAME.read(row),
                    first_name: FIRST_NAME.read(row),
                    last_name: LAST_NAME.read(row),
                    organization: ORGANIZATION.read(row),
                    role: ROLE.read(row),
                    title: TITLE.read(row),
                    checked_in: CHECKED_IN.read(row),
                })
            }
        }
    }

    pub fn sync_type(&self) -> SyncType {
        match self {
            Self::Session(_) => SyncType::Sessions,
            Self::Project(_) => SyncType::Projects,
            Self::Opportunity(_) => SyncType::Opportunities,
            Self::Partner(_) => SyncType::Partners,
            Self::Attendee(_) => SyncType::Attendees,
        }
    }

    /// The natural key this row would be stored under, if it has one.
    /// Available even when the row fails validation elsewhere.
    pub fn natural_key(&self) -> Option<String> {
        match self {
            Self::Session(r) => r.session_id.clone(),
            Self::Project(r) => r.project_id.clone(),
            Self::Opportunity(r) => r.opportunity_id.clone(),
            Self::Partner(r) => r
                .organization
                .as_deref()
                .map(coerce::slugify)
                .filter(|slug| !slug.is_empty()),
            Self::Attendee(r) => r.email.as_deref().map(|e| e.trim().to_lowercase()),
        }
    }
}

/// Every column the mapper reads for `sync_type`.
pub fn known_columns(sync_type: SyncType) -> &'static [Column] {
    use columns::*;
    match sync_type {
        SyncType::Sessions => &[
            session::SESSION_ID,
            session::TITLE,
            session::DESCRIPTION,
            session::START,
            session::END,
            session::LOCATION,
            session::SPEAKERS,
            session::SESSION_TYPE,
            session::CAPACITY,
            session::REQUIRES_RSVP,
        ],
        SyncType::Projects => &[
            project::PROJECT_ID,
            project::TITLE,
            project::DESCRIPTION,
            project::DEPARTMENT,
            project::STAGE,
            project::FACULTY_LEAD,
            project::STUDENTS,
            project::KEYWORDS,
            project::SEEKING_PARTNERSHIP,
        ],
        SyncType::Opportunities => &[
            opportunity::OPPORTUNITY_ID,
            opportunity::TITLE,
            opportunity::SPONSOR,
            opportunity::KIND,
            opportunity::DESCRIPTION,
            opportunity::DEADLINE,
            opportunity::AMOUNT,
            opportunity::URL,
        ],
        SyncType::Partners => &[
            partner::ORGANIZATION,
            partner::WEBSITE,
            partner::DESCRIPTION,
            partner::FOCUS_AREAS,
            partner::POC_NAME,
            partner::POC_EMAIL,
            partner::INTERESTS,
        ],
        SyncType::Attendees => &[
            attendee::EMAIL,
            attendee::FULL_NAME,
            attendee::FIRST_NAME,
            attendee::LAST_NAME,
            attendee::ORGANIZATION,
            attendee::ROLE,
            attendee::TITLE,
            attendee::CHECKED_IN,
        ],
    }
}

/// Canonical title of the column holding the natural key.
pub fn key_column(sync_type: SyncType) -> &'static str {
    match sync_type {
        SyncType::Sessions => columns::session::SESSION_ID.title,
        SyncType::Projects => columns::project::PROJECT_ID.title,
        SyncType::Opportunities => columns::opportunity::OPPORTUNITY_ID.title,
        SyncType::Partners => columns::partner::ORGANIZATION.title,
        SyncType::Attendees => columns::attendee::EMAIL.title,
    }
}
