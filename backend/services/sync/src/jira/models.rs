use serde::{Deserialize, Serialize};

/// Body of `POST /rest/api/3/issue`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateIssueRequest {
    pub fields: IssueFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueFields {
    pub project: ProjectRef,
    pub summary: String,
    pub issuetype: NamedRef,
    pub priority: NamedRef,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    pub description: AdfDocument,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRef {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedRef {
    pub name: String,
}

/// Atlassian Document Format, reduced to paragraphs of plain text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdfDocument {
    #[serde(rename = "type")]
    pub doc_type: String,
    pub version: u32,
    pub content: Vec<AdfNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdfNode {
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<AdfNode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl AdfDocument {
    /// One paragraph per non-blank line of `text`.
    pub fn from_lines(text: &str) -> Self {
        let content = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| AdfNode {
                node_type: "paragraph".to_owned(),
                content: Some(vec![AdfNode {
                    node_type: "text".to_owned(),
                    content: None,
                    text: Some(line.to_owned()),
                }]),
                text: None,
            })
            .collect();

        Self {
            doc_type: "doc".to_owned(),
            version: 1,
            content,
        }
    }
}

/// Response of a successful issue creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedIssue {
    pub id: String,
    pub key: String,
    #[serde(rename = "self", default)]
    pub self_url: Option<String>,
}
