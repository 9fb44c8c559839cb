use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use formsync_db::requests::models::SupportRequest;

/// Jira's stock priority scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Highest,
    High,
    Medium,
    Low,
    Lowest,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Highest => "Highest",
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
            Self::Lowest => "Lowest",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "highest" => Ok(Self::Highest),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            "lowest" => Ok(Self::Lowest),
            other => Err(format!("unknown priority `{other}`")),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    #[error("request {record_id} is missing required fields: {}", missing.join(", "))]
    IncompleteRecord {
        record_id: i64,
        missing: Vec<&'static str>,
    },
}

/// A request normalised into the shape the ticket payload needs.
///
/// `request` keeps the filled-in source fields; every field the payload reads
/// is guaranteed present.
#[derive(Debug, Clone, PartialEq)]
pub struct TicketDraft {
    pub request: SupportRequest,
    pub summary: String,
    pub description: String,
    pub priority: Priority,
}

impl TicketDraft {
    pub fn record_id(&self) -> i64 {
        self.request.id
    }

    /// Dedupe label attached to the created ticket.
    pub fn dedupe_label(&self) -> String {
        format!("formsync-request-{}", self.request.id)
    }
}

pub struct RecordTransformer {
    default_priority: Priority,
}

impl RecordTransformer {
    pub fn new(default_priority: Priority) -> Self {
        Self { default_priority }
    }

    pub fn transform(&self, record: SupportRequest) -> Result<TicketDraft, TransformError> {
        let mut request = normalize_blanks(record);

        if request.approximate_ending_date.is_none() {
            request.approximate_ending_date = request.date_needed_by;
        }

        let mut missing = Vec::new();
        if request.new_user_name.is_none() {
            missing.push("newusername");
        }
        if request.department_name.is_none() {
            missing.push("departmentname");
        }
        if request.date_needed_by.is_none() {
            missing.push("dateneededby");
        }
        if request.approximate_ending_date.is_none() {
            missing.push("approximateendingdate");
        }
        if !missing.is_empty() {
            return Err(TransformError::IncompleteRecord {
                record_id: request.id,
                missing,
            });
        }

        let priority = match request.priority.as_deref() {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::debug!(
                    record_id = request.id,
                    priority = raw,
                    "unknown priority, using default"
                );
                self.default_priority
            }),
            None => self.default_priority,
        };

        let summary = format!(
            "New Request for {} - {} Department",
            or_dash(&request.new_user_name),
            or_dash(&request.department_name)
        );
        let description = describe(&request);

        Ok(TicketDraft {
            request,
            summary,
            description,
            priority,
        })
    }
}

fn normalize_blanks(mut r: SupportRequest) -> SupportRequest {
    for field in [
        &mut r.new_user_name,
        &mut r.department_name,
        &mut r.sample_name,
        &mut r.phone_number,
        &mut r.job,
        &mut r.email_address,
        &mut r.cost_center,
        &mut r.telephone_lines,
        &mut r.handsets,
        &mut r.timeframe,
        &mut r.comments,
        &mut r.priority,
    ] {
        *field = field
            .take()
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty());
    }
    r
}

fn or_dash(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("-")
}

fn or_dash_date(value: Option<NaiveDate>) -> String {
    value.map(|d| d.to_string()).unwrap_or_else(|| "-".to_owned())
}

fn describe(r: &SupportRequest) -> String {
    [
        format!("Sample Name: {}", or_dash(&r.sample_name)),
        format!("Phone Number: {}", or_dash(&r.phone_number)),
        format!("Department: {}", or_dash(&r.department_name)),
        format!("Job: {}", or_dash(&r.job)),
        format!("Email: {}", or_dash(&r.email_address)),
        format!("Cost Center: {}", or_dash(&r.cost_center)),
        format!("Telephone Lines & Installations: {}", or_dash(&r.telephone_lines)),
        format!("Handsets & Headsets: {}", or_dash(&r.handsets)),
        format!("Timeframe: {}", or_dash(&r.timeframe)),
        format!("Date Needed By: {}", or_dash_date(r.date_needed_by)),
        format!("Approx. Ending Date: {}", or_dash_date(r.approximate_ending_date)),
        format!("Comments: {}", or_dash(&r.comments)),
        format!("Created At: {}", r.created_at.to_rfc3339()),
    ]
    .join("\n")
}
