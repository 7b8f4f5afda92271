// src/handlers.rs
use crate::{
    AppState,
    annotate::{CanvasAnnotator, EXPORT_FILENAME, ImageSummary},
    errors::HailError,
    frames::{DamageMarker, FrameDetails, FrameIndex},
    models::*,
    services::UploadKind,
    timeline::{TimelineController, format_time},
};
use actix_multipart::Multipart;
use actix_web::{Error, HttpResponse, web};
use bytes::{Bytes, BytesMut};
use futures_util::TryStreamExt;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

struct UploadedPart {
    name: String,
    filename: Option<String>,
    content_type: String,
    data: Bytes,
}

async fn read_parts(mut payload: Multipart) -> Result<Vec<UploadedPart>, Error> {
    let mut parts = Vec::new();

    while let Some(mut field) = payload.try_next().await? {
        let content_disposition = field.content_disposition();
        let name = content_disposition.get_name().unwrap_or_default().to_string();
        let filename = content_disposition.get_filename().map(str::to_string);

        let content_type = field
            .content_type()
            .map(|ct| ct.to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let mut data = BytesMut::new();
        while let Some(chunk) = field.try_next().await? {
            data.extend_from_slice(&chunk);
        }

        parts.push(UploadedPart {
            name,
            filename,
            content_type,
            data: data.freeze(),
        });
    }

    Ok(parts)
}

/// The first part carrying a file.
fn take_file(parts: &mut Vec<UploadedPart>) -> Result<UploadedPart, HailError> {
    let position = parts
        .iter()
        .position(|p| p.filename.is_some())
        .ok_or_else(|| HailError::Validation("No file provided".to_string()))?;
    Ok(parts.swap_remove(position))
}

fn png_response(png: Vec<u8>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("image/png")
        .insert_header((
            "Content-Disposition",
            format!("attachment; filename=\"{}\"", EXPORT_FILENAME),
        ))
        .body(png)
}

#[derive(Debug, Deserialize)]
pub struct AnnotationQuery {
    pub annotations: Option<bool>,
    /// `png` (default) or `data-url`.
    pub format: Option<String>,
}

fn export_response(
    annotator: &CanvasAnnotator,
    query: &AnnotationQuery,
) -> Result<HttpResponse, HailError> {
    match query.format.as_deref() {
        None | Some("png") => Ok(png_response(annotator.export_png()?)),
        Some("data-url") => Ok(HttpResponse::Ok().json(serde_json::json!({
            "filename": EXPORT_FILENAME,
            "data_url": annotator.export_data_url()?,
        }))),
        Some(other) => Err(HailError::Validation(format!(
            "Unknown export format: {}",
            other
        ))),
    }
}

pub async fn upload_image_inspection(
    payload: Multipart,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let mut parts = read_parts(payload).await?;
    let file = take_file(&mut parts)?;
    let filename = file.filename.clone().unwrap_or_default();

    data.image_processor
        .validate_upload(UploadKind::Image, &file.content_type, file.data.len())?;
    data.image_processor.validate_image(&file.data)?;

    let detections = data
        .backend
        .detect_image(file.data.clone(), &filename, &file.content_type)
        .await?;

    let inspection = ImageInspection {
        id: Uuid::new_v4(),
        filename,
        content_type: file.content_type,
        data: file.data.to_vec(),
        detections,
        created_at: chrono::Utc::now(),
    };

    data.redis_service.store_image_inspection(&inspection).await?;
    info!(
        "Stored image inspection {} ({} detections reported)",
        inspection.id, inspection.detections.num_detections
    );

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "inspection_id": inspection.id,
        "filename": inspection.filename,
        "summary": ImageSummary::from_set(&inspection.detections),
    })))
}

pub async fn get_image_inspection(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let inspection = data
        .redis_service
        .get_image_inspection(&path.into_inner())
        .await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "inspection_id": inspection.id,
        "filename": inspection.filename,
        "created_at": inspection.created_at,
        "detections": inspection.detections,
        "summary": ImageSummary::from_set(&inspection.detections),
    })))
}

pub async fn annotated_image(
    path: web::Path<Uuid>,
    query: web::Query<AnnotationQuery>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let inspection = data
        .redis_service
        .get_image_inspection(&path.into_inner())
        .await?;

    let image = data.image_processor.decode_image(&inspection.data)?;
    let mut annotator = CanvasAnnotator::new(data.label_font.clone());
    annotator.render(
        &image,
        &inspection.detections,
        query.annotations.unwrap_or(true),
    )?;

    Ok(export_response(&annotator, &query)?)
}

/// Annotates an image against caller-supplied detections without storing anything.
pub async fn annotate_upload(
    payload: Multipart,
    query: web::Query<AnnotationQuery>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let mut parts = read_parts(payload).await?;
    let file = take_file(&mut parts)?;
    let detections = parts
        .iter()
        .find(|p| p.name == "detections")
        .ok_or_else(|| HailError::Validation("Missing detections field".to_string()))?;

    // validate the response shape before touching any pixels
    let detections = parse_image_response(&detections.data)?;

    data.image_processor
        .validate_upload(UploadKind::Image, &file.content_type, file.data.len())?;
    let image = data.image_processor.decode_image(&file.data)?;

    let mut annotator = CanvasAnnotator::new(data.label_font.clone());
    annotator.render(&image, &detections, query.annotations.unwrap_or(true))?;

    Ok(export_response(&annotator, &query)?)
}

pub async fn upload_video_inspection(
    payload: Multipart,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let mut parts = read_parts(payload).await?;
    let file = take_file(&mut parts)?;
    let filename = file.filename.clone().unwrap_or_default();

    data.image_processor
        .validate_upload(UploadKind::Video, &file.content_type, file.data.len())?;

    let target = data.backend.request_upload_url(&filename).await?;
    data.backend
        .upload_video(&target.upload_url, file.data, &file.content_type)
        .await?;
    let result = data.backend.process_video(&target.s3_key).await?;

    let inspection = VideoInspection {
        id: Uuid::new_v4(),
        filename,
        s3_key: target.s3_key,
        result,
        created_at: chrono::Utc::now(),
    };

    data.redis_service.store_video_inspection(&inspection).await?;
    info!(
        "Stored video inspection {}: damage in {} frames ({:.1}% of video)",
        inspection.id,
        inspection.result.detection_summary.frames_with_damage,
        inspection.result.detection_summary.damage_percentage
    );

    Ok(HttpResponse::Ok().json(VideoOverview::build(&inspection, Playhead::default())))
}

#[derive(Debug, Serialize)]
pub struct DamageFrameEntry {
    pub frame_number: u64,
    pub timestamp: f64,
    pub timestamp_label: String,
    pub detection_count: usize,
}

#[derive(Debug, Serialize)]
pub struct PlayheadView {
    pub current_timestamp: f64,
    pub is_playing: bool,
    pub position_label: String,
    /// Whether the last navigation found a target.
    pub moved: bool,
    pub current_frame: Option<FrameDetails>,
}

impl PlayheadView {
    fn build(timeline: &TimelineController, index: &FrameIndex<'_>, moved: bool) -> Self {
        Self {
            current_timestamp: timeline.current_timestamp(),
            is_playing: timeline.is_playing(),
            position_label: timeline.position_label(),
            moved,
            current_frame: timeline.current_frame(index).map(FrameDetails::from_record),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VideoOverview {
    pub inspection_id: Uuid,
    pub filename: String,
    pub video_info: VideoInfo,
    pub detection_summary: DetectionSummary,
    pub duration_label: String,
    pub damage_markers: Vec<DamageMarker>,
    pub damage_frames: Vec<DamageFrameEntry>,
    pub playhead: PlayheadView,
}

impl VideoOverview {
    pub fn build(inspection: &VideoInspection, playhead: Playhead) -> Self {
        let result = &inspection.result;
        let duration = result.video_info.duration_seconds;
        let index = FrameIndex::new(&result.frames);
        let timeline = TimelineController::restore(duration, playhead);

        let damage_frames = index
            .damage_frames()
            .map(|f| DamageFrameEntry {
                frame_number: f.frame_number,
                timestamp: f.timestamp_seconds,
                timestamp_label: format_time(f.timestamp_seconds),
                detection_count: f.damage_count(),
            })
            .collect();

        Self {
            inspection_id: inspection.id,
            filename: inspection.filename.clone(),
            video_info: result.video_info.clone(),
            detection_summary: result.detection_summary.clone(),
            duration_label: format_time(duration),
            damage_markers: index.damage_markers(duration),
            damage_frames,
            playhead: PlayheadView::build(&timeline, &index, false),
        }
    }
}

pub async fn get_video_inspection(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let id = path.into_inner();
    let inspection = data.redis_service.get_video_inspection(&id).await?;
    let playhead = data.redis_service.get_playhead(&id).await?;

    Ok(HttpResponse::Ok().json(VideoOverview::build(&inspection, playhead)))
}

#[derive(Debug, Deserialize)]
pub struct FrameQuery {
    pub t: f64,
}

pub async fn frame_at(
    path: web::Path<Uuid>,
    query: web::Query<FrameQuery>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let inspection = data
        .redis_service
        .get_video_inspection(&path.into_inner())
        .await?;

    let index = FrameIndex::new(&inspection.result.frames);
    let frame = index.frame_at(query.t).map(FrameDetails::from_record);

    Ok(HttpResponse::Ok().json(frame))
}

#[derive(Debug, Clone, Copy)]
pub enum TimelineAction {
    Seek(f64),
    NextDamage,
    PreviousDamage,
    TogglePlay,
}

/// Applies one play-head operation; returns whether the play-head moved or toggled.
pub fn apply_action(
    timeline: &mut TimelineController,
    index: &FrameIndex<'_>,
    action: TimelineAction,
) -> bool {
    match action {
        TimelineAction::Seek(t) => {
            timeline.seek(t);
            true
        }
        TimelineAction::NextDamage => timeline.next(index).is_some(),
        TimelineAction::PreviousDamage => timeline.previous(index).is_some(),
        TimelineAction::TogglePlay => {
            timeline.toggle_play();
            true
        }
    }
}

/// One play-head transition: the play-head to store (if it changed) and the view to return.
fn step_playhead(
    duration: f64,
    index: &FrameIndex<'_>,
    playhead: Playhead,
    action: TimelineAction,
) -> (Option<Playhead>, PlayheadView) {
    let mut timeline = TimelineController::restore(duration, playhead);
    let moved = apply_action(&mut timeline, index, action);
    let view = PlayheadView::build(&timeline, index, moved);
    (moved.then(|| timeline.playhead()), view)
}

async fn navigate(
    id: Uuid,
    data: &AppState,
    action: TimelineAction,
) -> Result<HttpResponse, HailError> {
    let inspection = data.redis_service.get_video_inspection(&id).await?;
    let index = FrameIndex::new(&inspection.result.frames);
    let duration = inspection.result.video_info.duration_seconds;

    let view = data
        .redis_service
        .update_playhead(&id, |playhead| {
            step_playhead(duration, &index, playhead, action)
        })
        .await?;
    if !view.moved {
        warn!("No damage frame in that direction for {} ({:?})", id, action);
    }

    Ok(HttpResponse::Ok().json(view))
}

#[derive(Debug, Deserialize)]
pub struct SeekRequest {
    pub t: f64,
}

pub async fn seek(
    path: web::Path<Uuid>,
    body: web::Json<SeekRequest>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    Ok(navigate(path.into_inner(), &data, TimelineAction::Seek(body.t)).await?)
}

pub async fn next_damage(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    Ok(navigate(path.into_inner(), &data, TimelineAction::NextDamage).await?)
}

pub async fn previous_damage(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    Ok(navigate(path.into_inner(), &data, TimelineAction::PreviousDamage).await?)
}

pub async fn toggle_play(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    Ok(navigate(path.into_inner(), &data, TimelineAction::TogglePlay).await?)
}

pub async fn backend_status(data: web::Data<AppState>) -> Result<HttpResponse, Error> {
    let body = match data.backend.check_connection().await {
        Ok(()) => serde_json::json!({ "status": "connected" }),
        Err(e) => {
            warn!("Backend connection test failed: {}", e);
            serde_json::json!({ "status": "failed", "message": e.to_string() })
        }
    };

    Ok(HttpResponse::Ok().json(body))
}
