//! Azure DevTest Labs resource client
//!
//! Labs, lab VMs (exposed by the service as environments) and VM templates.
//! Creating VMs and VM templates goes through an ARM template deployment.

use std::sync::Arc;

use dtl_core::resource_id::{compute_id_from_environment_id, resource_group_from_lab_id};
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::deployment::{ARM_BASE_URL, DeploymentClient, DeploymentRequest, DeploymentResult};
use crate::error::ClientError;
use crate::http::{HttpRequest, Transport, resource_request};
use crate::poll::{OperationOutcome, PollPolicy, status_is, wait_for_operation};

pub const DEVTESTLAB_API_VERSION: &str = "2015-05-21-preview";

/// Longest name the service accepts for a VM template.
pub const VM_TEMPLATE_NAME_MAX_LEN: usize = 27;

/// Parameters for a new lab VM.
#[derive(Debug, Clone, Default)]
pub struct NewVm {
    pub lab_name: String,
    pub vm_name: String,
    /// Name of the lab VM template (base image) to create from
    pub template_name: String,
    pub size: String,
    pub user_name: Option<String>,
    pub password: Option<String>,
    pub ssh_key: Option<String>,
}

impl NewVm {
    /// Name of the ARM quickstart template matching the supplied credentials.
    pub fn arm_template_variant(&self) -> &'static str {
        if self.password.is_some() {
            "101-dtl-create-vm-username-pwd"
        } else if self.user_name.is_some() || self.ssh_key.is_some() {
            "101-dtl-create-vm-username-ssh"
        } else {
            "101-dtl-create-vm-builtin-user"
        }
    }

    /// Template parameters for the create-VM deployment.
    pub fn parameters(&self) -> Value {
        let mut params = Map::new();
        params.insert("newVMName".into(), json!({ "value": self.vm_name }));
        params.insert("existingLabName".into(), json!({ "value": self.lab_name }));
        params.insert(
            "existingVMTemplateName".into(),
            json!({ "value": self.template_name }),
        );
        params.insert("newVMSize".into(), json!({ "value": self.size }));
        for (key, value) in [
            ("userName", &self.user_name),
            ("password", &self.password),
            ("sshKey", &self.ssh_key),
        ] {
            if let Some(value) = value {
                params.insert(key.into(), json!({ "value": value }));
            }
        }
        Value::Object(params)
    }
}

/// Parameters for capturing a lab VM as a new VM template.
#[derive(Debug, Clone, Default)]
pub struct NewVmTemplate {
    pub lab_name: String,
    /// Compute resource ID of the VM to capture
    pub vm_id: String,
    pub template_name: String,
    pub description: String,
}

impl NewVmTemplate {
    pub fn parameters(&self) -> Value {
        json!({
            "existingLabName": { "value": self.lab_name },
            "existingVMResourceId": { "value": self.vm_id },
            "TemplateName": { "value": self.template_name },
            "TemplateDescription": { "value": self.description },
        })
    }
}

/// Which VM to act on.
#[derive(Debug, Clone, Copy)]
pub enum VmSelector<'a> {
    Name(&'a str),
    Id(&'a str),
}

impl std::fmt::Display for VmSelector<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Name(name) => write!(f, "named {name}"),
            Self::Id(id) => write!(f, "with id {id}"),
        }
    }
}

/// Result of deleting a lab VM.
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteOutcome {
    /// The service reported nothing to delete.
    AlreadyGone,
    Deleted,
    /// The delete operation finished unsuccessfully; holds the final status body.
    Failed(Value),
}

/// Client for one subscription's DevTest Labs resources.
pub struct LabClient {
    transport: Arc<dyn Transport>,
    access_token: String,
    subscription_id: String,
    base_url: String,
    policy: PollPolicy,
}

impl LabClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        access_token: impl Into<String>,
        subscription_id: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            access_token: access_token.into(),
            subscription_id: subscription_id.into(),
            base_url: ARM_BASE_URL.to_string(),
            policy: PollPolicy::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Poll policy for deployments and delete operations.
    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    /// List all labs in the subscription.
    pub async fn list_labs(&self) -> Result<Vec<Value>, ClientError> {
        debug!(subscription_id = %self.subscription_id, "listing labs");
        let url = format!(
            "{}/subscriptions/{}/providers/Microsoft.DevTestLab/labs/?api-version={DEVTESTLAB_API_VERSION}",
            self.base_url, self.subscription_id
        );
        let labs = self.get_list(&url).await?;
        debug!(count = labs.len(), "found labs");
        Ok(labs)
    }

    /// Find a lab by exact name.
    pub async fn get_lab_by_name(&self, lab_name: &str) -> Result<Option<Value>, ClientError> {
        debug!(lab_name, "finding lab");
        Ok(self
            .list_labs()
            .await?
            .into_iter()
            .find(|lab| lab.get("name").and_then(Value::as_str) == Some(lab_name)))
    }

    /// List the VMs in a lab.
    ///
    /// Each VM gets an `id` holding its compute resource ID and an
    /// `environmentId` holding the lab environment it lives in.
    pub async fn get_virtual_machines_for_lab(
        &self,
        lab_name: &str,
    ) -> Result<Vec<Value>, ClientError> {
        let (lab_id, _) = self.require_lab(lab_name).await?;
        self.vms_in_lab(&lab_id).await
    }

    async fn vms_in_lab(&self, lab_id: &str) -> Result<Vec<Value>, ClientError> {
        debug!(lab_id, "listing lab environments");
        let filter = format!(
            "tolower(Properties/LabId) eq tolower('{}')",
            odata_literal(lab_id)
        );
        let environments = self.get_environments(&filter).await?;

        let mut vms = Vec::new();
        for env in environments {
            let Some(env_id) = env.get("id").and_then(Value::as_str) else {
                continue;
            };
            let Some(Value::Array(env_vms)) = env.pointer("/properties/vms") else {
                continue;
            };
            for vm in env_vms {
                let mut vm = vm.clone();
                if let Value::Object(fields) = &mut vm {
                    fields.insert("id".into(), json!(compute_id_from_environment_id(env_id)));
                    fields.insert("environmentId".into(), json!(env_id));
                }
                vms.push(vm);
            }
        }

        debug!(count = vms.len(), "found virtual machines");
        Ok(vms)
    }

    /// Look up lab environments by resource ID.
    pub async fn get_virtual_machine(&self, vm_id: &str) -> Result<Vec<Value>, ClientError> {
        self.get_environments(&format!("tolower(Id) eq tolower('{}')", odata_literal(vm_id)))
            .await
    }

    /// Look up lab environments by name.
    pub async fn get_virtual_machine_by_name(&self, name: &str) -> Result<Vec<Value>, ClientError> {
        self.get_environments(&format!("tolower(Name) eq tolower('{}')", odata_literal(name)))
            .await
    }

    /// List a lab's VM templates, optionally only the one called `name`.
    pub async fn get_virtual_machine_templates(
        &self,
        lab_name: &str,
        name: Option<&str>,
    ) -> Result<Vec<Value>, ClientError> {
        let (lab_id, _) = self.require_lab(lab_name).await?;
        debug!(lab_name, "listing VM templates");

        let url = format!(
            "{}{lab_id}/vmtemplates?api-version={DEVTESTLAB_API_VERSION}",
            self.base_url
        );
        let templates = self.get_list(&url).await?;

        Ok(match name {
            Some(name) => templates
                .into_iter()
                .filter(|t| {
                    t.get("name")
                        .and_then(Value::as_str)
                        .is_some_and(|n| n.eq_ignore_ascii_case(name))
                })
                .collect(),
            None => templates,
        })
    }

    /// Deploy `arm_template` to create a new lab VM.
    pub async fn create_vm(
        &self,
        vm: &NewVm,
        arm_template: Value,
        cancel: &CancellationToken,
    ) -> Result<DeploymentResult, ClientError> {
        let (_, resource_group) = self.require_lab(&vm.lab_name).await?;
        debug!(
            lab = %vm.lab_name,
            name = %vm.vm_name,
            template = %vm.template_name,
            size = %vm.size,
            "creating virtual machine"
        );

        let request = DeploymentRequest::new(
            &self.subscription_id,
            resource_group,
            arm_template,
            vm.parameters(),
        );
        self.deployments().deploy(&request, cancel).await
    }

    /// Deploy `arm_template` to capture an existing lab VM as a VM template.
    pub async fn create_vm_template(
        &self,
        template: &NewVmTemplate,
        arm_template: Value,
        cancel: &CancellationToken,
    ) -> Result<DeploymentResult, ClientError> {
        validate_template_name(&template.template_name)?;

        let (lab_id, resource_group) = self.require_lab(&template.lab_name).await?;
        let vms = self.vms_in_lab(&lab_id).await?;
        if vms.is_empty() {
            return Err(ClientError::not_found(format!(
                "no virtual machines found in lab {}",
                template.lab_name
            )));
        }
        if find_vm(&vms, VmSelector::Id(&template.vm_id)).is_none() {
            return Err(ClientError::not_found(format!(
                "cannot find virtual machine with id {}",
                template.vm_id
            )));
        }

        debug!(
            vm_id = %template.vm_id,
            template_name = %template.template_name,
            "creating virtual machine template"
        );

        let request = DeploymentRequest::new(
            &self.subscription_id,
            resource_group,
            arm_template,
            template.parameters(),
        );
        self.deployments().deploy(&request, cancel).await
    }

    /// Delete a lab VM by removing its environment.
    pub async fn delete_virtual_machine(
        &self,
        lab_name: &str,
        target: VmSelector<'_>,
        cancel: &CancellationToken,
    ) -> Result<DeleteOutcome, ClientError> {
        let vms = self.get_virtual_machines_for_lab(lab_name).await?;
        let vm = find_vm(&vms, target).ok_or_else(|| {
            ClientError::not_found(format!("virtual machine {target} not found in lab {lab_name}"))
        })?;
        let environment_id = vm
            .get("environmentId")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::malformed("virtual machine has no environment id"))?;

        debug!(environment_id, "deleting virtual machine");
        let url = format!(
            "{}{environment_id}?api-version={DEVTESTLAB_API_VERSION}",
            self.base_url
        );
        let resp = self
            .transport
            .execute(self.arm_request(HttpRequest::delete(url)))
            .await?;

        if resp.status == 204 {
            return Ok(DeleteOutcome::AlreadyGone);
        }
        resp.error_for_status()?;

        let Some(location) = resp.header("Location") else {
            return Ok(DeleteOutcome::Deleted);
        };
        debug!(location, "waiting for delete operation");

        let status_request = self.arm_request(HttpRequest::get(location));
        let outcome = wait_for_operation(
            self.transport.as_ref(),
            &status_request,
            &self.policy,
            cancel,
            status_is("Succeeded"),
            status_is("Failed"),
        )
        .await?;

        Ok(match outcome {
            OperationOutcome::Succeeded(_) => DeleteOutcome::Deleted,
            OperationOutcome::Failed(body) => DeleteOutcome::Failed(body),
        })
    }

    /// Resolve a lab name to its ID and resource group.
    async fn require_lab(&self, lab_name: &str) -> Result<(String, String), ClientError> {
        let lab = self.get_lab_by_name(lab_name).await?.ok_or_else(|| {
            ClientError::not_found(format!(
                "lab {lab_name} does not exist or is not accessible"
            ))
        })?;
        let lab_id = lab
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::malformed("lab has no id"))?
            .to_string();
        let resource_group = resource_group_from_lab_id(&lab_id).ok_or_else(|| {
            ClientError::malformed(format!("the lab URI returned by the service is invalid: {lab_id}"))
        })?;
        Ok((lab_id, resource_group))
    }

    async fn get_environments(&self, filter: &str) -> Result<Vec<Value>, ClientError> {
        let url = format!(
            "{}/subscriptions/{}/providers/microsoft.devtestlab/environments/?$filter={}&api-version={DEVTESTLAB_API_VERSION}",
            self.base_url,
            self.subscription_id,
            urlencoding::encode(filter)
        );
        self.get_list(&url).await
    }

    /// GET an ARM list resource and return its `value` array.
    async fn get_list(&self, url: &str) -> Result<Vec<Value>, ClientError> {
        let resp = self
            .transport
            .execute(self.arm_request(HttpRequest::get(url)))
            .await?;
        resp.error_for_status()?;

        match resp.json() {
            Some(Value::Object(mut body)) => match body.remove("value") {
                Some(Value::Array(items)) => Ok(items),
                _ => Err(ClientError::malformed("list response has no value array")),
            },
            _ => Err(ClientError::malformed("list response is not a JSON object")),
        }
    }

    fn deployments(&self) -> DeploymentClient {
        DeploymentClient::new(self.transport.clone(), self.access_token.clone())
            .with_base_url(self.base_url.clone())
            .with_policy(self.policy.clone())
    }

    fn arm_request(&self, request: HttpRequest) -> HttpRequest {
        resource_request(request, &self.access_token, DEVTESTLAB_API_VERSION)
    }
}

/// Reject VM template names the service would refuse.
pub fn validate_template_name(name: &str) -> Result<(), ClientError> {
    if name.trim().is_empty() || name.chars().count() > VM_TEMPLATE_NAME_MAX_LEN {
        return Err(ClientError::invalid_argument(format!(
            "template name must be a valid string with a maximum length of {VM_TEMPLATE_NAME_MAX_LEN}"
        )));
    }
    Ok(())
}

fn find_vm<'v>(vms: &'v [Value], target: VmSelector<'_>) -> Option<&'v Value> {
    let (field, wanted) = match target {
        VmSelector::Name(name) => ("name", name),
        VmSelector::Id(id) => ("id", id),
    };
    vms.iter().find(|vm| {
        vm.get(field)
            .and_then(Value::as_str)
            .is_some_and(|v| v.eq_ignore_ascii_case(wanted))
    })
}

/// Quote `value` as an OData string literal body.
fn odata_literal(value: &str) -> String {
    value.replace('\'', "''")
}
