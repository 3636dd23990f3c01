use std::fmt;

use serde::Serialize;

use crate::error::StudyError;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_PER_PAGE: u32 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PathSegment {
    Owner,
    Project,
    Study,
}

impl PathSegment {
    fn index(self) -> usize {
        match self {
            PathSegment::Owner => 1,
            PathSegment::Project => 2,
            PathSegment::Study => 4,
        }
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Owner => write!(f, "account"),
            PathSegment::Project => write!(f, "project"),
            PathSegment::Study => write!(f, "study"),
        }
    }
}

/// `projects/{owner}/{project}/jobs/{study}/artifacts`, filled in as the
/// selections arrive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestPath {
    segments: [Option<String>; 6],
}

impl Default for RequestPath {
    fn default() -> Self {
        Self {
            segments: [
                Some("projects".to_string()),
                None,
                None,
                Some("jobs".to_string()),
                None,
                Some("artifacts".to_string()),
            ],
        }
    }
}

impl RequestPath {
    pub fn new(owner: Option<&str>, project: Option<&str>, study: Option<&str>) -> Self {
        let mut path = Self::default();
        path.set(PathSegment::Owner, owner.map(str::to_string));
        path.set(PathSegment::Project, project.map(str::to_string));
        path.set(PathSegment::Study, study.map(str::to_string));
        path
    }

    pub fn set(&mut self, segment: PathSegment, value: Option<String>) {
        self.segments[segment.index()] = value;
    }

    pub fn get(&self, segment: PathSegment) -> Option<&str> {
        self.segments[segment.index()].as_deref()
    }

    pub fn segments(&self) -> [Option<&str>; 6] {
        [
            self.segments[0].as_deref(),
            self.segments[1].as_deref(),
            self.segments[2].as_deref(),
            self.segments[3].as_deref(),
            self.segments[4].as_deref(),
            self.segments[5].as_deref(),
        ]
    }

    /// Returns the first selection the path is still waiting for.
    pub fn missing(&self) -> Option<PathSegment> {
        [PathSegment::Owner, PathSegment::Project, PathSegment::Study]
            .into_iter()
            .find(|segment| self.get(*segment).is_none())
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_none()
    }

    /// Joins all six segments, failing on the first unselected one.
    pub fn resolve(&self) -> Result<String, StudyError> {
        if let Some(segment) = self.missing() {
            return Err(StudyError::MissingSelection(segment));
        }
        let joined = self
            .segments
            .iter()
            .flatten()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("/");
        Ok(joined)
    }

    pub fn artifacts_path(&self) -> Result<String, StudyError> {
        Ok(format!("/{}", self.resolve()?))
    }

    pub fn download_path(&self) -> Result<String, StudyError> {
        Ok(format!("/{}/download", self.resolve()?))
    }

    /// `/projects/{owner}/{project}/jobs`, used for listing and submitting
    /// studies before one is selected.
    pub fn jobs_path(&self) -> Result<String, StudyError> {
        let owner = self
            .get(PathSegment::Owner)
            .ok_or(StudyError::MissingSelection(PathSegment::Owner))?;
        let project = self
            .get(PathSegment::Project)
            .ok_or(StudyError::MissingSelection(PathSegment::Project))?;
        Ok(format!("/projects/{owner}/{project}/jobs"))
    }
}

/// Query parameters sent with artifact requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestParams {
    pub page: u32,
    #[serde(rename = "per-page")]
    pub per_page: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Default for RequestParams {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            per_page: DEFAULT_PER_PAGE,
            path: None,
        }
    }
}

impl RequestParams {
    pub fn with_per_page(per_page: u32) -> Self {
        Self {
            per_page,
            ..Self::default()
        }
    }

    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut query = vec![
            ("page".to_string(), self.page.to_string()),
            ("per-page".to_string(), self.per_page.to_string()),
        ];
        if let Some(path) = &self.path {
            query.push(("path".to_string(), path.clone()));
        }
        query
    }
}
