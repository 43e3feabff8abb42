pub mod server;

#[derive(Debug)]
pub enum Action {
    Server {
        port: u16,
        dsn: Option<String>,
        base_url: String,
        email_relay_url: Option<String>,
        landing_path: String,
    },
}
