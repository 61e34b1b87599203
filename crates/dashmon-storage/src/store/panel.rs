use chrono::Utc;
use dashmon_common::types::{Panel, PanelTarget};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, EntityTrait, IntoActiveModel};

use crate::entities::panel::{self, Entity};
use crate::error::Result;
use crate::store::AlertStore;

fn to_panel(m: panel::Model) -> Result<Panel> {
    let targets: Vec<PanelTarget> = serde_json::from_str(&m.targets_json)?;
    Ok(Panel {
        id: m.id,
        dashboard_id: m.dashboard_id,
        title: m.title,
        datasource: m.datasource,
        targets,
    })
}

impl AlertStore {
    pub async fn get_panel(&self, id: &str) -> Result<Option<Panel>> {
        Entity::find_by_id(id)
            .one(self.db())
            .await?
            .map(to_panel)
            .transpose()
    }

    /// Inserts `panel` or replaces the stored copy with the same id.
    pub async fn upsert_panel(&self, panel: &Panel) -> Result<Panel> {
        let now = Utc::now().fixed_offset();
        let targets_json = serde_json::to_string(&panel.targets)?;

        let model = match Entity::find_by_id(panel.id.as_str()).one(self.db()).await? {
            Some(existing) => {
                let mut am = existing.into_active_model();
                am.dashboard_id = Set(panel.dashboard_id.clone());
                am.title = Set(panel.title.clone());
                am.datasource = Set(panel.datasource.clone());
                am.targets_json = Set(targets_json);
                am.updated_at = Set(now);
                am.update(self.db()).await?
            }
            None => {
                panel::ActiveModel {
                    id: Set(panel.id.clone()),
                    dashboard_id: Set(panel.dashboard_id.clone()),
                    title: Set(panel.title.clone()),
                    datasource: Set(panel.datasource.clone()),
                    targets_json: Set(targets_json),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(self.db())
                .await?
            }
        };
        to_panel(model)
    }
}
