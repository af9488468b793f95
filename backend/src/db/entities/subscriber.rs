use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "subscribers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)] // chat id assigned by the messenger
    pub id: i64,
    pub state: String,
    #[sea_orm(column_type = "JsonBinary")]
    pub properties: Json,
    // Ordered array of encoded monitor documents
    #[sea_orm(column_type = "JsonBinary")]
    pub monitors: Json,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::monitor_state::Entity")]
    MonitorState,
}

impl Related<super::monitor_state::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MonitorState.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
