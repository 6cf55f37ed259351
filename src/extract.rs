//! Request extractors whose rejections are reported as [`AcademyError::Validation`]
//! with the usual `{"error": ..}` body instead of axum's plain-text responses.

use axum::extract::{FromRequest, FromRequestParts};

use crate::error::AcademyError;

#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AcademyError))]
pub struct Body<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AcademyError))]
pub struct Params<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AcademyError))]
pub struct Id<T>(pub T);
