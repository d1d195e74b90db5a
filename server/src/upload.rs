use {
    crate::{
        Body, Context,
        error::{ServeError, internal},
    },
    bytes::BytesMut,
    cadd::{ops::Cadd, prelude::IntoType},
    filecrypt_protocol::{
        ChunkHash, ContentRange, FileId, KeyId, Mac, mac::verify_upload_mac,
        util::maybe_block_in_place,
    },
    http_body_util::{BodyExt, Empty},
    hyper::{
        HeaderMap, Request, Response, StatusCode,
        body::Incoming,
        header::{CONTENT_LENGTH, CONTENT_RANGE},
    },
    std::str::FromStr,
    tracing::{debug, info, instrument, warn},
};

fn parse_identifier<T>(value: &str, what: &str) -> Result<T, ServeError>
where
    T: FromStr<Err = anyhow::Error>,
{
    value.parse().map_err(|err| {
        warn!(?err, "invalid {what}");
        ServeError::MalformedIdentifier
    })
}

fn content_length(headers: &HeaderMap, max_chunk_size: u64) -> Result<u64, ServeError> {
    let content_length: u64 = headers
        .get(CONTENT_LENGTH)
        .ok_or_else(|| {
            warn!("missing content length in request");
            ServeError::LengthRequired
        })?
        .to_str()
        .map_err(|err| {
            warn!(%err, "invalid content length in request");
            ServeError::MalformedRequest
        })?
        .parse()
        .map_err(|err| {
            warn!(%err, "invalid content length in request");
            ServeError::MalformedRequest
        })?;
    if content_length > max_chunk_size {
        warn!(content_length, max_chunk_size, "chunk is too large");
        return Err(ServeError::ResourceExhausted);
    }
    if content_length == 0 {
        warn!("empty chunk");
        return Err(ServeError::MalformedRequest);
    }
    Ok(content_length)
}

/// `POST /{key_id}/{file_id}/{mac}/{chunk_hash}`
#[instrument(skip_all, fields(%file_id))]
pub(crate) async fn upload(
    ctx: &Context,
    mut request: Request<Incoming>,
    key_id: &str,
    file_id: &str,
    mac: &str,
    chunk_hash: &str,
) -> Result<Response<Body>, ServeError> {
    let key_id: KeyId = parse_identifier(key_id, "key id")?;
    let file_id: FileId = parse_identifier(file_id, "file id")?;
    let mac: Mac = parse_identifier(mac, "mac")?;
    let chunk_hash: ChunkHash = parse_identifier(chunk_hash, "chunk hash")?;

    let content_length = content_length(request.headers(), ctx.max_chunk_size)?;
    let key = ctx.keys.get(&key_id).ok_or_else(|| {
        warn!(?key_id, "unknown upload key");
        ServeError::AuthenticationFailure
    })?;
    let content_range = request
        .headers()
        .get(CONTENT_RANGE)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned());

    let mut body = BytesMut::with_capacity(usize::try_from(content_length).map_err(internal)?);
    while let Some(frame) = request.body_mut().frame().await {
        let frame = frame.map_err(|err| {
            warn!(%err, "failed to read request frame");
            ServeError::MalformedRequest
        })?;
        let Some(data) = frame.data_ref() else {
            warn!("unexpected trailer frame in request");
            return Err(ServeError::MalformedRequest);
        };
        let new_length = body
            .len()
            .cadd(data.len())
            .map_err(internal)?
            .try_into_type::<u64>()
            .map_err(internal)?;
        if new_length > content_length {
            warn!(content_length, "request body is longer than declared");
            return Err(ServeError::ResourceExhausted);
        }
        body.extend_from_slice(data);
    }
    let received_length = body.len().try_into_type::<u64>().map_err(internal)?;
    if received_length != content_length {
        warn!(content_length, received_length, "content length mismatch");
        return Err(ServeError::MalformedRequest);
    }

    if !chunk_hash.matches(&body) {
        warn!("chunk hash mismatch");
        return Err(ServeError::IntegrityFailure);
    }
    if !verify_upload_mac(key, &file_id, &chunk_hash, content_range.as_deref(), &mac) {
        warn!(?key_id, "invalid mac");
        return Err(ServeError::AuthenticationFailure);
    }

    let _lock = ctx.storage.lock(&file_id).await;
    if maybe_block_in_place(|| ctx.storage.is_complete(&file_id)).map_err(internal)? {
        warn!("file already exists");
        return Err(ServeError::Conflict);
    }

    let status = if let Some(content_range) = content_range {
        let range: ContentRange = content_range.parse().map_err(|err| {
            warn!(?err, "invalid content range");
            ServeError::MalformedRequest
        })?;
        if range.size() != received_length {
            warn!(%range, received_length, "content range doesn't match body size");
            return Err(ServeError::MalformedRequest);
        }
        if range.total > ctx.max_upload_size {
            warn!(total = range.total, "upload is too large");
            return Err(ServeError::ResourceExhausted);
        }
        maybe_block_in_place(|| {
            let partial_len = ctx.storage.partial_len(&file_id).map_err(internal)?;
            if range.start > partial_len {
                warn!(%range, partial_len, "chunk is not contiguous");
                return Err(ServeError::RangeNotSatisfiable { size: None });
            }
            if range.start > 0 {
                let declared = ctx.storage.partial_total(&file_id).map_err(internal)?;
                if declared != Some(range.total) {
                    warn!(%range, ?declared, "total size differs from earlier chunks");
                    return Err(ServeError::MalformedRequest);
                }
            }
            ctx.storage
                .write_chunk(&file_id, &range, &body)
                .map_err(internal)?;
            if range.is_last() {
                ctx.storage.commit_partial(&file_id).map_err(internal)?;
                info!(size = range.total, "upload complete");
                Ok(StatusCode::OK)
            } else {
                debug!(%range, "chunk stored");
                Ok(StatusCode::PARTIAL_CONTENT)
            }
        })?
    } else {
        if received_length > ctx.max_upload_size {
            warn!(received_length, "upload is too large");
            return Err(ServeError::ResourceExhausted);
        }
        maybe_block_in_place(|| ctx.storage.store_complete(&file_id, &body)).map_err(internal)?;
        info!(size = received_length, "upload complete");
        StatusCode::OK
    };

    let mut response = Response::new(BodyExt::boxed(Empty::new()));
    *response.status_mut() = status;
    Ok(response)
}
