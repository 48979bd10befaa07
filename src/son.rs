pub mod neighbor_table;
pub mod overlay;
