pub mod distance_vector;
pub mod dv_table;
pub mod link_state;
pub mod node;
pub mod packet;
pub mod protocol;
pub mod routing_table;
pub mod son_link;
