pub use super::deployment::Entity as DeploymentEntity;
pub use super::tool::Entity as ToolEntity;
