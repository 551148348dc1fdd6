//! Sandbox planning
//!
//! Turns a claimed job and its context into everything the sandbox needs:
//! image, command, environment and mounts.

use keel_core::deploy::{DEPLOY_IMAGE, DOCKER_SOCKET, DeployDriver};
use keel_core::domain::Job;
use keel_core::dto::job::JobContext;

/// Variables forced into every sandbox to keep output free of colors and prompts
const NON_INTERACTIVE_ENV: [&str; 4] = ["CI=true", "TERM=dumb", "NO_COLOR=1", "FORCE_COLOR=0"];

/// What a job asks the sandbox to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPlan {
    /// A pipeline step: run the command in the step's image
    Step {
        image: Option<String>,
        command: String,
    },
    /// A deploy job: run the driver's script with access to the host Docker daemon
    Deploy(DeployDriver),
}

impl JobPlan {
    pub fn for_job(job: &Job) -> Self {
        match job.deploy_driver() {
            Some(driver) => JobPlan::Deploy(driver),
            None => JobPlan::Step {
                image: job.image.clone(),
                command: job.command.clone(),
            },
        }
    }

    /// Image the sandbox runs
    pub fn image(&self, default_image: &str) -> String {
        match self {
            JobPlan::Deploy(_) => DEPLOY_IMAGE.to_string(),
            JobPlan::Step { image, .. } => image
                .as_deref()
                .map(str::trim)
                .filter(|i| !i.is_empty())
                .unwrap_or(default_image)
                .to_string(),
        }
    }

    /// Shell script passed to `/bin/sh -lc`
    pub fn script(&self) -> String {
        match self {
            JobPlan::Deploy(driver) => driver.script(),
            JobPlan::Step { command, .. } => command.clone(),
        }
    }
}

/// Fully resolved sandbox settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxSpec {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub binds: Vec<String>,
    pub working_dir: String,
}

impl SandboxSpec {
    pub fn resolve(job: &Job, context: &JobContext, default_image: &str) -> Self {
        let plan = JobPlan::for_job(job);

        let mut env = context.env_vars.clone();
        env.extend(NON_INTERACTIVE_ENV.iter().map(|v| v.to_string()));

        let mut binds = vec![format!(
            "{}:{}",
            context.workdir_host, context.workdir_in_container
        )];
        if matches!(plan, JobPlan::Deploy(_)) {
            binds.push(format!("{}:{}", DOCKER_SOCKET, DOCKER_SOCKET));
        }

        let suffix = uuid::Uuid::new_v4().simple().to_string();

        Self {
            name: format!("keel-job-{}-{}", job.id, &suffix[..8]),
            image: plan.image(default_image),
            cmd: vec!["/bin/sh".to_string(), "-lc".to_string(), plan.script()],
            env,
            binds,
            working_dir: context.workdir_in_container.clone(),
        }
    }
}
