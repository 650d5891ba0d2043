//! Built-in worker capability profiles.

use serde::{Deserialize, Serialize};

use crate::boundary::{AutonomyLevel, BoundaryProfile, IMAGE_WORKER_ID};
use crate::plan::StepCategory;

/// Worker identity for the web-browsing capability. Also the fallback
/// when nothing else matches an instruction.
pub const BROWSER_WORKER_ID: &str = "browser";
/// Worker identity for the code-execution capability.
pub const CODER_WORKER_ID: &str = "coder";
/// Worker identity for the file-handling capability.
pub const FILE_WORKER_ID: &str = "file-manager";

/// Static description of one worker type's capabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCapabilityProfile {
    /// Worker identity steps are assigned to.
    pub worker_id: String,
    /// Step categories this worker supports.
    pub categories: Vec<StepCategory>,
    /// Keywords and phrases that pull instructions toward this worker.
    pub affinity: Vec<String>,
    /// Default latitude granted to this worker.
    pub autonomy: AutonomyLevel,
    /// Default limits when no category profile applies.
    pub boundary: BoundaryProfile,
    /// Tie-break order; lower wins.
    pub priority: u8,
}

impl AgentCapabilityProfile {
    pub fn supports(&self, category: StepCategory) -> bool {
        self.categories.contains(&category)
    }
}

fn phrases(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

/// The four built-in worker profiles, in priority order.
pub fn built_in_profiles() -> Vec<AgentCapabilityProfile> {
    vec![
        AgentCapabilityProfile {
            worker_id: BROWSER_WORKER_ID.to_string(),
            categories: vec![StepCategory::InformationGathering],
            affinity: phrases(&[
                "search", "browse", "web", "website", "look up", "find", "news", "online",
                "download", "wikipedia", "research", "visit",
            ]),
            autonomy: AutonomyLevel::Autonomous,
            boundary: BoundaryProfile::new(4, 180, AutonomyLevel::Autonomous),
            priority: 0,
        },
        AgentCapabilityProfile {
            worker_id: CODER_WORKER_ID.to_string(),
            categories: vec![
                StepCategory::CodeExecution,
                StepCategory::FormatConversion,
                StepCategory::ContentGeneration,
            ],
            affinity: phrases(&[
                "code", "script", "python", "run", "execute", "convert", "csv", "json",
                "parse", "compute", "calculate", "write", "summarize", "analyze",
            ]),
            autonomy: AutonomyLevel::Supervised,
            boundary: BoundaryProfile::new(5, 300, AutonomyLevel::Supervised),
            priority: 1,
        },
        AgentCapabilityProfile {
            worker_id: IMAGE_WORKER_ID.to_string(),
            categories: vec![StepCategory::ContentGeneration],
            affinity: phrases(&[
                "image", "picture", "photo", "illustration", "logo", "drawing", "painting",
                "render", "visual",
            ]),
            autonomy: AutonomyLevel::Supervised,
            boundary: BoundaryProfile::new(1, 60, AutonomyLevel::Supervised),
            priority: 2,
        },
        AgentCapabilityProfile {
            worker_id: FILE_WORKER_ID.to_string(),
            categories: vec![StepCategory::FileOperation, StepCategory::DocumentAssembly],
            affinity: phrases(&[
                "file", "save", "move", "copy", "folder", "directory", "document", "pdf",
                "assemble", "merge", "organize", "rename",
            ]),
            autonomy: AutonomyLevel::Guided,
            boundary: BoundaryProfile::new(3, 120, AutonomyLevel::Guided),
            priority: 3,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_category_has_a_supporting_profile() {
        let profiles = built_in_profiles();
        for category in StepCategory::all() {
            assert!(
                profiles.iter().any(|p| p.supports(category)),
                "no profile supports {category}"
            );
        }
    }

    #[test]
    fn test_worker_ids_are_unique() {
        let profiles = built_in_profiles();
        let mut ids: Vec<&str> = profiles.iter().map(|p| p.worker_id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), profiles.len());
    }

    #[test]
    fn test_image_profile_is_single_action() {
        let profiles = built_in_profiles();
        let image = profiles
            .iter()
            .find(|p| p.worker_id == IMAGE_WORKER_ID)
            .expect("image profile must exist");
        assert_eq!(image.boundary.max_actions, 1);
    }
}
