use crate::error::{PipelineError, PipelineResult};
use crate::output::schema::PipelineSpec;
use crate::pipeline::plan::BuildPlan;
use crate::validation::rules::{
    AbsolutePathsRule, AppReferenceRule, ExecFormCommandRule, Finding, IdentityOrderRule,
    NetworkContractRule, NonRootIdentityRule, NonRootUserRule, OwnershipFixRule,
    PinnedBaseImageRule, PinnedToolRule, PlanRule, RequiredFieldsRule, RuntimePackagesRule,
    SingleExposedPortRule, StageSeparationRule, ValidImageNameRule, ValidationRule,
};

pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
    plan_rules: Vec<Box<dyn PlanRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: Vec<Box<dyn ValidationRule>>, plan_rules: Vec<Box<dyn PlanRule>>) -> Self {
        Self { rules, plan_rules }
    }

    /// Stop at the first failing definition rule. Errors already carrying a
    /// pipeline category keep it; everything else is a validation failure.
    pub fn validate(&self, spec: &PipelineSpec) -> PipelineResult<()> {
        for rule in &self.rules {
            if let Err(e) = rule.validate(spec) {
                return Err(match e.downcast::<PipelineError>() {
                    Ok(err) => err,
                    Err(e) => PipelineError::Validation(format!("[{}] {}", rule.name(), e)),
                });
            }
        }
        Ok(())
    }

    /// Every plan rule finding, in rule order
    pub fn check_plan(&self, plan: &BuildPlan) -> Vec<Finding> {
        self.plan_rules
            .iter()
            .flat_map(|rule| {
                rule.check(plan)
                    .into_iter()
                    .map(move |message| Finding::new(rule.name(), message))
            })
            .collect()
    }

    pub fn validate_plan(&self, plan: &BuildPlan) -> PipelineResult<()> {
        match self.check_plan(plan).into_iter().next() {
            Some(finding) => Err(PipelineError::Validation(format!(
                "[{}] {}",
                finding.check, finding.message
            ))),
            None => Ok(()),
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self {
            rules: vec![
                Box::new(RequiredFieldsRule),
                Box::new(ValidImageNameRule),
                Box::new(AppReferenceRule),
                Box::new(NonRootIdentityRule),
                Box::new(NetworkContractRule),
                Box::new(AbsolutePathsRule),
                Box::new(PinnedToolRule),
                Box::new(RuntimePackagesRule),
            ],
            plan_rules: vec![
                Box::new(StageSeparationRule),
                Box::new(NonRootUserRule),
                Box::new(IdentityOrderRule),
                Box::new(OwnershipFixRule),
                Box::new(SingleExposedPortRule),
                Box::new(ExecFormCommandRule),
                Box::new(PinnedBaseImageRule),
            ],
        }
    }
}
