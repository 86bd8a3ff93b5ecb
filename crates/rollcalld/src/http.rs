//! HTTP surface for the attendance daemon.
//!
//! Thin actix-web handlers over the capture engine. Workflow outcomes are
//! deliberately plain text: this is a single-operator local tool, not an API
//! with structured error responses. Inline HTML stands in for a templating
//! layer.

use actix_web::{web, HttpResponse, Responder};
use rollcall_core::EncodingStore;
use serde::Deserialize;

use crate::engine::EngineHandle;

/// Shared state for the HTTP handlers: the engine handle and a read-only
/// view of the encoding store for the landing page.
pub struct AppState {
    pub engine: EngineHandle,
    pub store: EncodingStore,
}

/// Mount all routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(index)))
        .service(
            web::resource("/register")
                .route(web::get().to(register_form))
                .route(web::post().to(register)),
        )
        .service(
            web::resource("/recognize")
                .route(web::get().to(recognize))
                .route(web::post().to(recognize)),
        )
        .service(web::resource("/recognize/stop").route(web::post().to(recognize_stop)))
        .service(web::resource("/preview.jpg").route(web::get().to(preview)));
}

#[derive(Deserialize)]
pub struct RegisterForm {
    #[serde(default)]
    name: String,
}

async fn index(state: web::Data<AppState>) -> impl Responder {
    let names = state.store.names().unwrap_or_default();
    let listing = if names.is_empty() {
        "<li><em>no faces registered yet</em></li>".to_string()
    } else {
        names
            .iter()
            .map(|n| format!("<li>{}</li>", escape_html(n)))
            .collect::<String>()
    };

    HttpResponse::Ok().content_type("text/html; charset=utf-8").body(format!(
        "<html><body>\
         <h1>Rollcall</h1>\
         <p><a href=\"/register\">Register a face</a> | \
         <a href=\"/recognize\">Take attendance</a></p>\
         <h2>Registered faces</h2><ul>{listing}</ul>\
         </body></html>"
    ))
}

fn registration_form_page() -> HttpResponse {
    HttpResponse::Ok().content_type("text/html; charset=utf-8").body(
        "<html><body>\
         <h1>Register a face</h1>\
         <form method=\"post\" action=\"/register\">\
         <label>Name: <input type=\"text\" name=\"name\"></label>\
         <button type=\"submit\">Register</button>\
         </form>\
         </body></html>",
    )
}

async fn register_form() -> impl Responder {
    registration_form_page()
}

async fn register(state: web::Data<AppState>, form: web::Form<RegisterForm>) -> impl Responder {
    let name = form.name.trim().to_string();
    if name.is_empty() {
        // Nothing to do without a name: re-render the form
        return registration_form_page();
    }

    tracing::info!(name, "enrollment requested");
    match state.engine.enroll(name).await {
        Ok(()) => HttpResponse::Ok().body("Face registered successfully!"),
        Err(err) if err.is_rejection() => HttpResponse::Ok()
            .body("Face registration failed. Ensure the image contains a single face."),
        Err(err) => {
            tracing::error!(error = %err, "enrollment failed");
            HttpResponse::InternalServerError().body(format!("enrollment failed: {err}"))
        }
    }
}

async fn recognize(state: web::Data<AppState>) -> impl Responder {
    tracing::info!("recognition requested");
    match state.engine.recognize().await {
        Ok(names) => HttpResponse::Ok().body(format!("Recognized: {}", names.join(", "))),
        Err(err) => {
            tracing::error!(error = %err, "recognition failed");
            HttpResponse::InternalServerError().body(format!("recognition failed: {err}"))
        }
    }
}

async fn recognize_stop(state: web::Data<AppState>) -> impl Responder {
    state.engine.stop_capture();
    HttpResponse::Ok().body("recognition stop requested")
}

async fn preview(state: web::Data<AppState>) -> impl Responder {
    match state.engine.latest_preview() {
        Some(jpeg) => HttpResponse::Ok().content_type("image/jpeg").body(jpeg),
        None => HttpResponse::NotFound().body("no preview available"),
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
