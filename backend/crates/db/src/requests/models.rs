use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Column that holds the created ticket key once a request has been synced.
pub const SYNC_MARKER_COLUMN: &str = "jira_issue_key";

/// One web-form submission from the source table.
///
/// Text columns are nullable in the source; blank values are normalised later
/// by the sync service, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportRequest {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub new_user_name: Option<String>,
    pub department_name: Option<String>,
    pub sample_name: Option<String>,
    pub phone_number: Option<String>,
    pub job: Option<String>,
    pub email_address: Option<String>,
    pub cost_center: Option<String>,
    pub telephone_lines: Option<String>,
    pub handsets: Option<String>,
    pub timeframe: Option<String>,
    pub date_needed_by: Option<NaiveDate>,
    pub approximate_ending_date: Option<NaiveDate>,
    pub comments: Option<String>,
    pub priority: Option<String>,
}

impl SupportRequest {
    /// A request with only the identifying columns set.
    pub fn new(id: i64, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at,
            new_user_name: None,
            department_name: None,
            sample_name: None,
            phone_number: None,
            job: None,
            email_address: None,
            cost_center: None,
            telephone_lines: None,
            handsets: None,
            timeframe: None,
            date_needed_by: None,
            approximate_ending_date: None,
            comments: None,
            priority: None,
        }
    }
}
