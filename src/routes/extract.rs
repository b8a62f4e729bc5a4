//! Extractors whose rejections go through [`Error`], so a malformed body or
//! path still answers with the `{error, message}` shape.

use axum::extract::{FromRequest, FromRequestParts};

use crate::error::Error;

#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(Error))]
pub struct ApiJson<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(Error))]
pub struct ApiPath<T>(pub T);
