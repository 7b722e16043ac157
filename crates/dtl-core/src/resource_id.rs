//! Azure Resource Manager resource ID helpers
//!
//! Lab IDs have the shape
//! `/subscriptions/<guid>/resourceGroups/<rg>/providers/Microsoft.DevTestLab/labs/<lab>`.

use std::sync::LazyLock;

use regex::Regex;

static LAB_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^/subscriptions/([0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})/resourceGroups/([a-z0-9][^/]*)/providers/Microsoft\.DevTestLab/labs/([a-z0-9][^/]*)",
    )
    .expect("lab id pattern is valid")
});

static ENVIRONMENT_TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Microsoft\.DevTestLab/environments").expect("environment pattern is valid")
});

const COMPUTE_RESOURCE_TYPE: &str = "Microsoft.Compute/virtualMachines";

/// The parts of a DevTest Labs lab resource ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabResourceId {
    pub subscription_id: String,
    pub resource_group: String,
    pub lab_name: String,
}

impl LabResourceId {
    /// Parse a lab resource ID. Returns `None` if the ID does not match the
    /// ARM lab ID grammar.
    pub fn parse(id: &str) -> Option<Self> {
        let caps = LAB_ID_RE.captures(id)?;
        Some(Self {
            subscription_id: caps[1].to_string(),
            resource_group: caps[2].to_string(),
            lab_name: caps[3].to_string(),
        })
    }

    /// Rebuild the canonical lab resource ID.
    pub fn to_id(&self) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.DevTestLab/labs/{}",
            self.subscription_id, self.resource_group, self.lab_name
        )
    }
}

/// Extract the resource group name from a lab resource ID.
pub fn resource_group_from_lab_id(lab_id: &str) -> Option<String> {
    LabResourceId::parse(lab_id).map(|id| id.resource_group)
}

/// Find the name following `segment` in a resource ID, ignoring case.
///
/// `resource_name("/subscriptions/s/resourceGroups/rg/...", "resourcegroups")`
/// returns `Some("rg")`.
pub fn resource_name<'a>(id: &'a str, segment: &str) -> Option<&'a str> {
    id.split('/')
        .collect::<Vec<_>>()
        .windows(2)
        .find(|w| w[0].eq_ignore_ascii_case(segment))
        .map(|w| w[1])
        .filter(|name| !name.is_empty())
}

/// Map a lab environment ID onto the ID of the compute VM it hosts.
pub fn compute_id_from_environment_id(environment_id: &str) -> String {
    ENVIRONMENT_TYPE_RE
        .replace(environment_id, COMPUTE_RESOURCE_TYPE)
        .into_owned()
}
