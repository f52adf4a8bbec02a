use super::Config;
use std::path::PathBuf;

fn parse_provider_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl Config {
    pub fn apply_env_overrides(&mut self) {
        if let Ok(workspace) = std::env::var("CONTENTFORGE_WORKSPACE")
            && !workspace.is_empty()
        {
            self.workspace_dir = PathBuf::from(shellexpand::tilde(&workspace).as_ref());
        }

        if let Ok(order) = std::env::var("CONTENTFORGE_TEXT_PROVIDERS") {
            let order = parse_provider_list(&order);
            if !order.is_empty() {
                self.providers.text_order = order;
            }
        }

        if let Ok(order) = std::env::var("CONTENTFORGE_IMAGE_PROVIDERS") {
            let order = parse_provider_list(&order);
            if !order.is_empty() {
                self.providers.image_order = order;
            }
        }

        if let Ok(db_path) = std::env::var("CONTENTFORGE_DB_PATH")
            && !db_path.is_empty()
        {
            self.storage.db_path = db_path;
        }

        if let Ok(raw) = std::env::var("CONTENTFORGE_MAX_ATTEMPTS")
            && let Ok(attempts) = raw.parse::<u32>()
            && attempts >= 1
        {
            self.reliability.max_attempts = attempts;
        }
    }
}
