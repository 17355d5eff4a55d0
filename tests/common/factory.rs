use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::json;
use uuid::Uuid;

use toolhost::entity::deployment;

use toolhost::models::{CreateTool, Tool};
use toolhost::repositories::{Repository, ToolRepository};
use toolhost::services::AuthService;
use toolhost::state::AppState;

/// Authentication info for tests
pub struct TestAuth {
    pub user_id: Uuid,
    pub email: String,
    pub token: String,
}

impl TestAuth {
    /// Get the Authorization header value
    pub fn auth_header(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

/// Factory for creating test data
pub struct Factory<'a> {
    state: &'a AppState,
}

impl<'a> Factory<'a> {
    pub fn new(state: &'a AppState) -> Self {
        Self { state }
    }

    /// A user identity with a valid bearer token
    pub fn create_user(&self) -> TestAuth {
        let user_id = Uuid::new_v4();
        let email = format!("test-{}@example.com", user_id);
        let token = AuthService::generate_token(user_id, &email, &self.state.config).unwrap();

        TestAuth {
            user_id,
            email,
            token,
        }
    }

    /// Create a tool owned by `user_id`
    pub async fn create_tool(&self, user_id: Uuid, name: &str) -> Tool {
        let input = CreateTool {
            name: name.to_string(),
            description: Some(format!("{} description", name)),
            definition: json!({ "fields": [{ "name": "amount", "type": "number" }] }),
        };

        ToolRepository::create(&self.state.db, user_id, &input)
            .await
            .unwrap()
    }

    /// Point a deployment's health check at a local endpoint
    pub async fn point_health_check(&self, deployment_id: Uuid, url: &str) {
        let model = deployment::Entity::find_by_id(deployment_id)
            .one(&self.state.db)
            .await
            .unwrap()
            .unwrap();

        let mut active: deployment::ActiveModel = model.into();
        active.health_check_url = Set(url.to_string());
        active.update(&self.state.db).await.unwrap();
    }

    /// Reload a tool from the database
    pub async fn reload_tool(&self, tool_id: Uuid) -> Tool {
        ToolRepository::find_by_id(&self.state.db, tool_id)
            .await
            .unwrap()
    }
}
