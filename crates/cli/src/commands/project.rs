//! Project Commands

use anyhow::Result;
use clap::Subcommand;
use flowbench_common::{ProjectDescriptor, ProjectManager, Version, VersionInfo};
use serde::Serialize;

use crate::context::CliContext;
use crate::output::{print_item, print_list, print_success, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum ProjectCommands {
    /// List automation projects
    List,

    /// Show a project
    Get {
        /// Project ID
        id: String,
    },

    /// Create an automation project
    Create {
        /// Display name
        #[arg(short, long)]
        name: String,

        /// Namespace; also names the data model
        #[arg(long)]
        namespace: String,
    },

    /// List the versions of a project
    Versions {
        /// Project ID
        id: String,
    },

    /// Branch a new version
    CreateVersion {
        /// Project ID
        id: String,

        /// Source version (defaults to the active version)
        #[arg(long)]
        from: Option<Version>,
    },

    /// Make a version the active one
    Switch {
        /// Project ID
        id: String,

        /// Version to activate
        version: Version,
    },

    /// Freeze a version and its data model
    Publish {
        /// Project ID
        id: String,

        /// Version to publish (defaults to the active version)
        #[arg(long)]
        version: Option<Version>,
    },

    /// Recompile the data model of the active version
    Refresh {
        /// Project ID
        id: String,
    },

    /// Manage prefabs of a project
    #[command(subcommand)]
    Prefab(PrefabCommands),
}

#[derive(Subcommand)]
pub enum PrefabCommands {
    /// List prefabs owned by a project
    List {
        /// Owning project ID
        owner: String,
    },

    /// Create a prefab
    Create {
        /// Owning project ID
        owner: String,

        /// Display name
        #[arg(short, long)]
        name: String,

        /// Namespace; also names the data model
        #[arg(long)]
        namespace: String,
    },
}

#[derive(Serialize)]
pub struct ProjectDisplay {
    pub id: String,
    pub name: String,
    pub namespace: String,
    pub kind: String,
    pub active_version: String,
    pub versions: usize,
}

impl From<&ProjectDescriptor> for ProjectDisplay {
    fn from(p: &ProjectDescriptor) -> Self {
        Self {
            id: p.id.clone(),
            name: p.name.clone(),
            namespace: p.namespace.clone(),
            kind: p.kind.to_string(),
            active_version: p
                .active_version
                .map(|v| v.to_string())
                .unwrap_or_else(|| "-".to_string()),
            versions: p.versions.len(),
        }
    }
}

impl TableDisplay for ProjectDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Name", "Namespace", "Kind", "Active", "Versions"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.name.clone(),
            self.namespace.clone(),
            self.kind.clone(),
            self.active_version.clone(),
            self.versions.to_string(),
        ]
    }
}

#[derive(Serialize)]
pub struct VersionDisplay {
    pub version: String,
    pub active: bool,
    pub published: bool,
    pub data_model: String,
    pub created_at: String,
}

impl VersionDisplay {
    fn new(info: &VersionInfo, active: Option<Version>) -> Self {
        Self {
            version: info.version.to_string(),
            active: active == Some(info.version),
            published: info.is_deployed,
            data_model: info.data_model_assembly.clone().unwrap_or_default(),
            created_at: info.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

impl TableDisplay for VersionDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Version", "Active", "Published", "Data Model", "Created"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.version.clone(),
            if self.active { "*".to_string() } else { String::new() },
            if self.published { "yes".to_string() } else { "no".to_string() },
            self.data_model.clone(),
            self.created_at.clone(),
        ]
    }
}

fn find(ctx: &CliContext, id: &str) -> Result<ProjectDescriptor> {
    ctx.automation()
        .list_projects()?
        .into_iter()
        .find(|p| p.id == id)
        .ok_or_else(|| anyhow::anyhow!("project {} not found", id))
}

pub async fn execute(cmd: ProjectCommands, ctx: &CliContext, format: OutputFormat) -> Result<()> {
    match cmd {
        ProjectCommands::List => {
            let projects = ctx.automation().list_projects()?;
            let displays: Vec<ProjectDisplay> = projects.iter().map(ProjectDisplay::from).collect();
            print_list(&displays, format);
        }

        ProjectCommands::Get { id } => {
            print_item(&ProjectDisplay::from(&find(ctx, &id)?), format);
        }

        ProjectCommands::Create { name, namespace } => {
            let project = ctx.automation().create_project(&name, &namespace)?;
            print_success(&format!("Project '{}' created", project.name));
            print_item(&ProjectDisplay::from(&project), format);
        }

        ProjectCommands::Versions { id } => {
            let project = find(ctx, &id)?;
            let displays: Vec<VersionDisplay> = project
                .versions
                .iter()
                .map(|v| VersionDisplay::new(v, project.active_version))
                .collect();
            print_list(&displays, format);
        }

        ProjectCommands::CreateVersion { id, from } => {
            let mut manager = ctx.automation();
            manager.load(&id, None)?;
            let info = manager.create_version(from)?;
            print_success(&format!("Version {} created", info.version));
        }

        ProjectCommands::Switch { id, version } => {
            let mut manager = ctx.automation();
            manager.load(&id, None)?;
            manager.switch_version(version)?;
            print_success(&format!("Switched to version {}", version));
        }

        ProjectCommands::Publish { id, version } => {
            let mut manager = ctx.automation();
            manager.load(&id, version)?;
            let info = manager.publish()?;
            print_success(&format!(
                "Version {} published with data model {}",
                info.version,
                info.data_model_assembly.unwrap_or_default()
            ));
        }

        ProjectCommands::Refresh { id } => {
            let mut opened = ctx.open(&id, None)?;
            let identity = opened.repo.refresh_project(&mut opened.project)?;
            print_success(&format!("Data model refreshed to {}", identity));
        }

        ProjectCommands::Prefab(PrefabCommands::List { owner }) => {
            let prefabs = ctx.prefabs(&owner).list_projects()?;
            let displays: Vec<ProjectDisplay> = prefabs.iter().map(ProjectDisplay::from).collect();
            print_list(&displays, format);
        }

        ProjectCommands::Prefab(PrefabCommands::Create {
            owner,
            name,
            namespace,
        }) => {
            find(ctx, &owner)?;
            let prefab = ctx.prefabs(&owner).create_project(&name, &namespace)?;
            print_success(&format!("Prefab '{}' created", prefab.name));
            print_item(&ProjectDisplay::from(&prefab), format);
        }
    }

    Ok(())
}
