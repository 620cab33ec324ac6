use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};
use captioner::config::AppConfig;
use captioner::model::ModelState;
use captioner::routes::{configure_routes, cors};
use captioner::state::AppState;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = AppConfig::from_env().map_err(|e| {
        log::error!("Invalid configuration: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e)
    })?;

    log::info!("Starting image caption service v{}", env!("CARGO_PKG_VERSION"));
    let models = ModelState::load(&config);
    log::info!("Caption models ready in {} mode", models.mode());

    let bind_address = (config.host.clone(), config.port);
    log::info!("Listening on {}:{}", bind_address.0, bind_address.1);

    let state = web::Data::new(AppState::new(config, models));

    let server = HttpServer::new(move || {
        App::new()
            .wrap(cors(&state.config))
            .wrap(Logger::default())
            .app_data(state.clone())
            .configure(configure_routes)
    })
    .bind(bind_address)?
    .run();

    let result = server.await;
    log::info!("Shutting down caption service");
    result
}
