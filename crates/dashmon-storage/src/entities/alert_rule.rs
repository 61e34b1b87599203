use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "alert_rules")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub dashboard_id: String,
    pub panel_id: String,
    pub name: String,
    pub message: String,
    pub frequency: String,
    pub datasource: Option<String>,
    pub query: Option<String>,
    pub metric: Option<String>,
    pub condition_json: String,
    pub notifications_json: String,
    pub state: String,
    pub enabled: bool,
    pub last_value: Option<f64>,
    pub last_evaluated_at: Option<DateTimeWithTimeZone>,
    pub last_triggered_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
