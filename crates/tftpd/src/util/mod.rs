mod get_interface_ip;

pub use get_interface_ip::get_interface_ip;
