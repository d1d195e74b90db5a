use {
    bytes::Bytes,
    filecrypt_protocol::{ChunkHash, FileId, UploadKey, mac::upload_mac},
    filecrypt_sdk::client::UploadOptions,
    filecrypt_tests::{
        EncryptedUpload, MAX_CHUNK_SIZE, MAX_UPLOAD_SIZE, TestServer, list_files, random_content,
    },
    futures::stream,
    reqwest::{StatusCode, header::CONTENT_RANGE},
    std::{convert::Infallible, time::Duration},
    tempfile::TempDir,
};

fn range(start: usize, end: usize, total: usize) -> String {
    format!("bytes {start}-{end}/{total}")
}

#[tokio::test(flavor = "multi_thread")]
async fn chunked_upload_state() {
    let server = TestServer::start().await.unwrap();
    let plaintext = random_content(25);
    let file = EncryptedUpload::new("a.bin", &plaintext).unwrap();
    let total = file.data.len();
    let url = server.download_url(&file).unwrap();

    let first = range(0, 39, total);
    let response = server
        .post_chunk(&file.file_id, &file.data[..40], Some(&first))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);

    // Resending a chunk that was already stored is accepted.
    let response = server
        .post_chunk(&file.file_id, &file.data[..40], Some(&first))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);

    // Unfinished uploads can't be downloaded.
    let response = server.get(url.clone(), None).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Chunks must be contiguous.
    let gap = range(50, total - 1, total);
    let response = server
        .post_chunk(&file.file_id, &file.data[50..], Some(&gap))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert!(!response.headers().contains_key(CONTENT_RANGE));

    let last = range(40, total - 1, total);
    let response = server
        .post_chunk(&file.file_id, &file.data[40..], Some(&last))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = server
        .post_chunk(&file.file_id, &file.data[40..], Some(&last))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = server.get(url, None).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.bytes().await.unwrap(), plaintext);
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn rewinding_discards_the_tail() {
    let server = TestServer::start().await.unwrap();
    let plaintext = random_content(64);
    let file = EncryptedUpload::new("a.bin", &plaintext).unwrap();
    let total = file.data.len();

    for (start, end) in [(0, 59), (60, 99), (30, 89), (90, total - 1)] {
        let response = server
            .post_chunk(
                &file.file_id,
                &file.data[start..=end],
                Some(&range(start, end, total)),
            )
            .await
            .unwrap();
        let expected = if end == total - 1 {
            StatusCode::OK
        } else {
            StatusCode::PARTIAL_CONTENT
        };
        assert_eq!(response.status(), expected, "{start}-{end}");
    }

    let response = server
        .get(server.download_url(&file).unwrap(), None)
        .await
        .unwrap();
    assert_eq!(response.bytes().await.unwrap(), plaintext);
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn single_request_upload() {
    let server = TestServer::start().await.unwrap();
    let plaintext = random_content(100);
    let file = EncryptedUpload::new("a.bin", &plaintext).unwrap();

    let response = server
        .post_chunk(&file.file_id, &file.data, None)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let response = server
        .post_chunk(&file.file_id, &file.data, None)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = server
        .get(server.download_url(&file).unwrap(), None)
        .await
        .unwrap();
    assert_eq!(response.bytes().await.unwrap(), plaintext);
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn single_request_after_partial_upload() {
    let server = TestServer::start().await.unwrap();
    let plaintext = random_content(100);
    let file = EncryptedUpload::new("a.bin", &plaintext).unwrap();
    let total = file.data.len();

    let response = server
        .post_chunk(&file.file_id, &file.data[..40], Some(&range(0, 39, total)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert!(!list_files(&server.storage.path().join("tmp")).unwrap().is_empty());

    let response = server
        .post_chunk(&file.file_id, &file.data, None)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(list_files(&server.storage.path().join("tmp")).unwrap().is_empty());
    assert_eq!(
        server.stored_files().unwrap(),
        vec![format!("{}.enc", file.file_id)]
    );

    let response = server
        .get(server.download_url(&file).unwrap(), None)
        .await
        .unwrap();
    assert_eq!(response.bytes().await.unwrap(), plaintext);
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn total_size_must_not_change() {
    let server = TestServer::start().await.unwrap();
    let file = EncryptedUpload::new("a.bin", &random_content(100)).unwrap();
    let total = file.data.len();

    let response = server
        .post_chunk(&file.file_id, &file.data[..40], Some(&range(0, 39, total)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);

    // Claims the file ends right after this chunk.
    let response = server
        .post_chunk(&file.file_id, &file.data[40..60], Some(&range(40, 59, 60)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(server.stored_files().unwrap().is_empty());
    let response = server
        .get(server.download_url(&file).unwrap(), None)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // The upload can still be finished with the original total.
    let response = server
        .post_chunk(&file.file_id, &file.data[40..], Some(&range(40, total - 1, total)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn forged_requests() {
    let server = TestServer::start().await.unwrap();
    let file = EncryptedUpload::new("a.bin", &random_content(10)).unwrap();
    let key_id = server.upload_key.key_id();
    let hash = ChunkHash::of(&file.data);
    let total = file.data.len();
    let full = range(0, total - 1, total);

    // Signed for another content range.
    let mac = upload_mac(&server.upload_key, &file.file_id, &hash, None);
    let response = server
        .post_signed(&key_id, &file.file_id, &mac, &hash, &file.data, Some(&full))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Signed for another file.
    let other_id = FileId::generate().unwrap();
    let mac = upload_mac(&server.upload_key, &other_id, &hash, Some(&full));
    let response = server
        .post_signed(&key_id, &file.file_id, &mac, &hash, &file.data, Some(&full))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Signed with a key the server doesn't know.
    let stranger = UploadKey::generate();
    let mac = upload_mac(&stranger, &file.file_id, &hash, Some(&full));
    let response = server
        .post_signed(
            &stranger.key_id(),
            &file.file_id,
            &mac,
            &hash,
            &file.data,
            Some(&full),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Body doesn't match the signed hash.
    let mac = upload_mac(&server.upload_key, &file.file_id, &hash, Some(&full));
    let mut tampered = file.data.clone();
    tampered[60] ^= 1;
    let response = server
        .post_signed(&key_id, &file.file_id, &mac, &hash, &tampered, Some(&full))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert!(server.stored_files().unwrap().is_empty());
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_requests() {
    let server = TestServer::start().await.unwrap();
    let file = EncryptedUpload::new("a.bin", &random_content(10)).unwrap();
    let key_id = server.upload_key.key_id().to_string();
    let hash = ChunkHash::of(&file.data).to_string();
    let mac = upload_mac(
        &server.upload_key,
        &file.file_id,
        &ChunkHash::of(&file.data),
        None,
    )
    .to_string();

    for (key_id, file_id, mac, hash) in [
        ("bad", file.file_id.as_str(), mac.as_str(), hash.as_str()),
        (key_id.as_str(), "bad", mac.as_str(), hash.as_str()),
        (key_id.as_str(), file.file_id.as_str(), "bad", hash.as_str()),
        (key_id.as_str(), file.file_id.as_str(), mac.as_str(), "bad"),
    ] {
        let response = server
            .post_raw(key_id, file_id, mac, hash, file.data.clone(), None)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    for content_range in ["bytes 0-65/*", "bytes */66", "0-65/66", "bytes 0-64/66"] {
        let mac = upload_mac(
            &server.upload_key,
            &file.file_id,
            &ChunkHash::of(&file.data),
            Some(content_range),
        );
        let response = server
            .post_signed(
                &server.upload_key.key_id(),
                &file.file_id,
                &mac,
                &ChunkHash::of(&file.data),
                &file.data,
                Some(content_range),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{content_range}");
    }
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn size_limits() {
    let server = TestServer::start().await.unwrap();
    let file_id = FileId::generate().unwrap();
    let max_chunk = usize::try_from(MAX_CHUNK_SIZE).unwrap();

    let response = server
        .post_chunk(&file_id, &random_content(max_chunk + 1), None)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let chunk = random_content(100);
    let too_large = range(0, 99, usize::try_from(MAX_UPLOAD_SIZE).unwrap() + 1);
    let response = server
        .post_chunk(&file_id, &chunk, Some(&too_large))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    // A streamed body has no Content-Length.
    let hash = ChunkHash::of(&chunk);
    let mac = upload_mac(&server.upload_key, &file_id, &hash, None);
    let url = server
        .url([
            server.upload_key.key_id().to_string().as_str(),
            file_id.as_str(),
            mac.to_string().as_str(),
            hash.to_string().as_str(),
        ])
        .unwrap();
    let body = reqwest::Body::wrap_stream(stream::iter([Ok::<_, Infallible>(Bytes::from(
        chunk,
    ))]));
    let response = reqwest::Client::new()
        .post(url)
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::LENGTH_REQUIRED);
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_uploads_of_one_file() {
    let server = TestServer::start().await.unwrap();
    let file = EncryptedUpload::new("a.bin", &random_content(500)).unwrap();

    let (first, second) = tokio::join!(
        server.post_chunk(&file.file_id, &file.data, None),
        server.post_chunk(&file.file_id, &file.data, None),
    );
    let mut statuses = [first.unwrap().status(), second.unwrap().status()];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::OK, StatusCode::CONFLICT]);
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_upload_keeps_local_file() {
    let server = TestServer::start().await.unwrap();
    let dir = TempDir::new().unwrap();
    let file = EncryptedUpload::new("a.bin", &random_content(50)).unwrap();
    let path = dir.path().join(format!("{}.enc", file.file_id));
    fs_err::write(&path, &file.data).unwrap();

    let options = UploadOptions {
        chunk_size: 32,
        max_retries: Some(1),
        retry_delay: Duration::from_millis(10),
    };
    server
        .client()
        .unwrap()
        .upload_file(&path, &file.file_id, &UploadKey::generate(), &options, |_| {})
        .await
        .unwrap_err();
    assert!(path.exists());
    assert!(server.stored_files().unwrap().is_empty());
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_server() {
    let dir = TempDir::new().unwrap();
    let file = EncryptedUpload::new("a.bin", &random_content(50)).unwrap();
    let path = dir.path().join("a.enc");
    fs_err::write(&path, &file.data).unwrap();

    let port = portpicker::pick_unused_port().unwrap();
    let client =
        filecrypt_sdk::client::Client::new(format!("http://127.0.0.1:{port}/").parse().unwrap())
            .unwrap();
    let options = UploadOptions {
        chunk_size: 1000,
        max_retries: Some(2),
        retry_delay: Duration::from_millis(10),
    };
    let err = client
        .upload_file(&path, &file.file_id, &UploadKey::generate(), &options, |_| {})
        .await
        .unwrap_err();
    assert!(format!("{err:?}").contains("giving up after 2 attempts"));
    assert!(path.exists());
}
