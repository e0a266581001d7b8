use bytes::Buf;
use futures_util::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use warp::multipart::FormData;
use warp::{Filter, Rejection, Reply};

use crate::background_removal::BackgroundColor;
use crate::config::Config;
use crate::image_crop::CropSelection;
use crate::layout_renderer::{render_preview, render_print_canvas, RenderPlan};
use crate::package_catalog::{self, PhotoPackage};
use crate::studio_session::{SessionRegistry, StudioError};
use crate::warp_helpers::{
    not_found, processing, session_reply, studio_rejection, validation, with_config,
    with_signed_in_session, SessionHandle,
};
use crate::working_image::{ImageData, WorkingImageInfo};

#[derive(Debug, Serialize)]
pub struct PackagesResponse {
    pub packages: &'static [PhotoPackage],
    pub selected: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct SelectPackageRequest {
    pub package_id: String,
}

/// Both render targets come from the same plan in the same response.
#[derive(Debug, Serialize)]
pub struct LayoutResponse {
    pub package: &'static PhotoPackage,
    pub plan: RenderPlan,
    pub preview_html: String,
    pub print_html: String,
    pub image: Option<WorkingImageInfo>,
}

impl LayoutResponse {
    pub fn for_session(handle: &SessionHandle) -> Self {
        let plan = handle.session.render_plan();
        Self {
            package: handle.session.package(),
            preview_html: render_preview(&plan),
            print_html: render_print_canvas(&plan),
            plan,
            image: handle.session.image_info(),
        }
    }
}

/// Either an explicit pixel square or the pan/zoom view it was derived from.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CropRequest {
    Region { x: u32, y: u32, size: u32 },
    View {
        zoom: f64,
        center_x: f64,
        center_y: f64,
    },
}

#[derive(Debug, Default, Deserialize)]
pub struct BackgroundRequest {
    #[serde(default)]
    pub color: Option<BackgroundColor>,
}

#[derive(Debug, Deserialize)]
pub struct SheetQuery {
    pub dpi: Option<u32>,
}

pub async fn list_packages(handle: SessionHandle) -> Result<impl Reply, Rejection> {
    let response = PackagesResponse {
        packages: package_catalog::catalog(),
        selected: handle.session.package().id,
    };
    Ok(session_reply(warp::reply::json(&response), &handle))
}

pub async fn select_package(
    request: SelectPackageRequest,
    handle: SessionHandle,
) -> Result<impl Reply, Rejection> {
    let package = handle
        .session
        .select_package(&request.package_id)
        .map_err(studio_rejection)?;
    log::debug!("Selected package {}", package.id);
    Ok(session_reply(
        warp::reply::json(&LayoutResponse::for_session(&handle)),
        &handle,
    ))
}

pub async fn get_layout(handle: SessionHandle) -> Result<impl Reply, Rejection> {
    Ok(session_reply(
        warp::reply::json(&LayoutResponse::for_session(&handle)),
        &handle,
    ))
}

async fn read_file_part(form: FormData) -> Result<Option<Vec<u8>>, warp::Error> {
    let mut form = std::pin::pin!(form);
    while let Some(part) = form.try_next().await? {
        if part.name() != "file" {
            continue;
        }
        let bytes = part
            .stream()
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(chunk.chunk());
                Ok(acc)
            })
            .await?;
        return Ok(Some(bytes));
    }
    Ok(None)
}

pub async fn upload_image(form: FormData, handle: SessionHandle) -> Result<impl Reply, Rejection> {

    let bytes = match read_file_part(form).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return Err(validation("Missing multipart field 'file'")),
        Err(e) => {
            log::warn!("Failed to read upload: {}", e);
            return Err(validation(format!("Failed to read upload: {}", e)));
        }
    };

    let session = handle.session.clone();
    let info = tokio::task::spawn_blocking(move || session.upload(&bytes))
        .await
        .map_err(|e| processing(format!("Upload task failed: {}", e)))?
        .map_err(studio_rejection)?;

    Ok(session_reply(warp::reply::json(&info), &handle))
}

fn png_reply(image: &ImageData) -> impl Reply {
    let reply = warp::reply::with_header(image.png().to_vec(), "content-type", "image/png");
    // URLs carry the content hash, so the bytes never change for a URL
    warp::reply::with_header(reply, "cache-control", "private, max-age=31536000, immutable")
}

pub async fn get_original_image(handle: SessionHandle) -> Result<impl Reply, Rejection> {
    let image = handle
        .session
        .original()
        .ok_or_else(|| not_found("No image uploaded yet"))?;
    Ok(session_reply(png_reply(&image), &handle))
}

pub async fn get_current_image(handle: SessionHandle) -> Result<impl Reply, Rejection> {
    let image = handle
        .session
        .current()
        .ok_or_else(|| not_found("No image uploaded yet"))?;
    Ok(session_reply(png_reply(&image), &handle))
}

pub async fn crop_image(
    request: CropRequest,
    handle: SessionHandle,
) -> Result<impl Reply, Rejection> {

    let selection = match request {
        CropRequest::Region { x, y, size } => CropSelection::new(x, y, size),
        CropRequest::View {
            zoom,
            center_x,
            center_y,
        } => {
            let original = handle
                .session
                .original()
                .ok_or_else(|| studio_rejection(StudioError::NoImage))?;
            let (width, height) = original.dimensions();
            CropSelection::from_view(width, height, zoom, center_x, center_y)
                .map_err(|e| studio_rejection(e.into()))?
        }
    };

    let session = handle.session.clone();
    let info = tokio::task::spawn_blocking(move || session.crop(&selection))
        .await
        .map_err(|e| processing(format!("Crop task failed: {}", e)))?
        .map_err(studio_rejection)?;

    Ok(session_reply(warp::reply::json(&info), &handle))
}

pub async fn remove_background(
    request: BackgroundRequest,
    handle: SessionHandle,
) -> Result<impl Reply, Rejection> {
    let color = request.color.unwrap_or_default();

    let info = handle
        .session
        .remove_background(color)
        .await
        .map_err(studio_rejection)?;

    Ok(session_reply(warp::reply::json(&info), &handle))
}

pub async fn undo_background(handle: SessionHandle) -> Result<impl Reply, Rejection> {
    let info = handle
        .session
        .undo_background()
        .map_err(studio_rejection)?;
    Ok(session_reply(warp::reply::json(&info), &handle))
}

pub async fn get_sheet(
    query: SheetQuery,
    handle: SessionHandle,
    config: Arc<Config>,
) -> Result<impl Reply, Rejection> {
    let dpi = query.dpi.unwrap_or(config.print_dpi);

    let session = handle.session.clone();
    let png = tokio::task::spawn_blocking(move || session.sheet_png(dpi))
        .await
        .map_err(|e| processing(format!("Sheet task failed: {}", e)))?
        .map_err(studio_rejection)?;

    let reply = warp::reply::with_header(png, "content-type", "image/png");
    let reply = warp::reply::with_header(
        reply,
        "content-disposition",
        format!(
            "inline; filename=\"portracv-{}.png\"",
            handle.session.package().id
        ),
    );
    Ok(session_reply(reply, &handle))
}

pub fn build_studio_routes(
    registry: SessionRegistry,
    config: Arc<Config>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let packages_list = warp::path("api")
        .and(warp::path("packages"))
        .and(warp::path::end())
        .and(warp::get())
        .and(with_signed_in_session(registry.clone()))
        .and_then(list_packages);

    let package_select = warp::path("api")
        .and(warp::path("package"))
        .and(warp::path::end())
        .and(warp::put())
        .and(warp::body::json::<SelectPackageRequest>())
        .and(with_signed_in_session(registry.clone()))
        .and_then(select_package);

    let layout = warp::path("api")
        .and(warp::path("layout"))
        .and(warp::path::end())
        .and(warp::get())
        .and(with_signed_in_session(registry.clone()))
        .and_then(get_layout);

    let image_upload = warp::path("api")
        .and(warp::path("image"))
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::multipart::form().max_length(config.max_upload_bytes()))
        .and(with_signed_in_session(registry.clone()))
        .and_then(upload_image);

    let image_original = warp::path("api")
        .and(warp::path("image"))
        .and(warp::path("original"))
        .and(warp::path::end())
        .and(warp::get())
        .and(with_signed_in_session(registry.clone()))
        .and_then(get_original_image);

    let image_current = warp::path("api")
        .and(warp::path("image"))
        .and(warp::path("current"))
        .and(warp::path::end())
        .and(warp::get())
        .and(with_signed_in_session(registry.clone()))
        .and_then(get_current_image);

    let image_crop = warp::path("api")
        .and(warp::path("image"))
        .and(warp::path("crop"))
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json::<CropRequest>())
        .and(with_signed_in_session(registry.clone()))
        .and_then(crop_image);

    let background = warp::path("api")
        .and(warp::path("image"))
        .and(warp::path("background"))
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json::<BackgroundRequest>())
        .and(with_signed_in_session(registry.clone()))
        .and_then(remove_background);

    let background_undo = warp::path("api")
        .and(warp::path("image"))
        .and(warp::path("background"))
        .and(warp::path("undo"))
        .and(warp::path::end())
        .and(warp::post())
        .and(with_signed_in_session(registry.clone()))
        .and_then(undo_background);

    let sheet = warp::path("api")
        .and(warp::path("sheet.png"))
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::query::<SheetQuery>())
        .and(with_signed_in_session(registry))
        .and(with_config(config))
        .and_then(get_sheet);

    packages_list
        .or(package_select)
        .or(layout)
        .or(image_upload)
        .or(image_original)
        .or(image_current)
        .or(image_crop)
        .or(background)
        .or(background_undo)
        .or(sheet)
}
