pub mod geocode_use_case;
pub mod ports;
