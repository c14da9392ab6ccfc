pub mod storage_layer;
pub mod table_layer;
