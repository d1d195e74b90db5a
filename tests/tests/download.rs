use {
    filecrypt_protocol::FileId,
    filecrypt_sdk::{
        client::UploadOptions,
        crypto::{DEFAULT_CHUNK_SIZE, generate},
    },
    filecrypt_tests::{EncryptedUpload, TestServer, list_files, random_content},
    reqwest::{
        StatusCode,
        header::{ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_RANGE},
    },
    std::time::Duration,
    tempfile::TempDir,
};

#[tokio::test(flavor = "multi_thread")]
async fn upload_then_download_ranges() {
    let server = TestServer::start().await.unwrap();
    let plaintext = random_content(25);
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("report.pdf");
    fs_err::write(&input, &plaintext).unwrap();

    let (file_id, token, key) = generate("report.pdf").unwrap();
    let encrypted = key
        .encrypt_file(&input, dir.path(), DEFAULT_CHUNK_SIZE, |_| {})
        .unwrap();
    let options = UploadOptions {
        chunk_size: 10,
        max_retries: Some(3),
        retry_delay: Duration::from_millis(10),
    };
    let client = server.client().unwrap();
    let mut uploaded = 0;
    client
        .upload_file(&encrypted, &file_id, &server.upload_key, &options, |n| {
            uploaded += n;
        })
        .await
        .unwrap();
    assert_eq!(uploaded, 56 + 25);
    assert_eq!(list_files(dir.path()).unwrap(), vec!["report.pdf".to_owned()]);
    assert_eq!(
        server.stored_files().unwrap(),
        vec![format!("{file_id}.enc")]
    );

    let url = client
        .download_url(&file_id, &token.display_unmasked().to_string(), "report.pdf")
        .unwrap();

    let response = server.get(url.clone(), None).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[ACCEPT_RANGES], "bytes");
    assert_eq!(response.headers()[CONTENT_LENGTH], "25");
    assert_eq!(
        response.headers()[CONTENT_DISPOSITION],
        "attachment; filename*=UTF-8''report.pdf"
    );
    assert_eq!(response.bytes().await.unwrap(), plaintext);

    let response = server.get(url.clone(), Some("bytes=5-14")).await.unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[CONTENT_RANGE], "bytes 5-14/25");
    assert_eq!(response.headers()[CONTENT_LENGTH], "10");
    assert_eq!(response.bytes().await.unwrap(), plaintext[5..15]);

    let response = server.get(url.clone(), Some("bytes=17-")).await.unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[CONTENT_RANGE], "bytes 17-24/25");
    assert_eq!(response.bytes().await.unwrap(), plaintext[17..]);

    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn ranges_across_cipher_blocks() {
    let server = TestServer::start().await.unwrap();
    let plaintext = random_content(900);
    let file = EncryptedUpload::new("data.bin", &plaintext).unwrap();
    let response = server
        .post_chunk(&file.file_id, &file.data, None)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let url = server.download_url(&file).unwrap();
    for (start, end) in [(0, 15), (1, 16), (15, 17), (16, 31), (100, 899), (511, 512)] {
        let response = server
            .get(url.clone(), Some(&format!("bytes={start}-{end}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT, "{start}-{end}");
        assert_eq!(
            response.bytes().await.unwrap(),
            plaintext[start..=end],
            "{start}-{end}"
        );
    }
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn unsatisfiable_ranges() {
    let server = TestServer::start().await.unwrap();
    let file = EncryptedUpload::new("a.txt", &random_content(25)).unwrap();
    server
        .post_chunk(&file.file_id, &file.data, None)
        .await
        .unwrap();
    let url = server.download_url(&file).unwrap();

    for range in ["bytes=0-25", "bytes=14-5", "bytes=5-5", "bytes=25-"] {
        let response = server.get(url.clone(), Some(range)).await.unwrap();
        assert_eq!(
            response.status(),
            StatusCode::RANGE_NOT_SATISFIABLE,
            "{range}"
        );
        assert_eq!(response.headers()[CONTENT_RANGE], "bytes */25");
    }

    // Not a single byte range, served in full.
    let response = server.get(url, Some("bytes=-5")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.bytes().await.unwrap().len(), 25);
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_file() {
    let server = TestServer::start().await.unwrap();
    let file = EncryptedUpload::new("empty", &[]).unwrap();
    assert_eq!(file.data.len(), 56);
    server
        .post_chunk(&file.file_id, &file.data, None)
        .await
        .unwrap();
    let url = server.download_url(&file).unwrap();

    let response = server.get(url.clone(), None).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.bytes().await.unwrap().is_empty());

    let response = server.get(url, Some("bytes=0-")).await.unwrap();
    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(response.headers()[CONTENT_RANGE], "bytes */0");
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn non_ascii_filename() {
    let server = TestServer::start().await.unwrap();
    let plaintext = random_content(40);
    let file = EncryptedUpload::new("Отчёт 2024 (final).txt", &plaintext).unwrap();
    server
        .post_chunk(&file.file_id, &file.data, None)
        .await
        .unwrap();

    let response = server
        .get(server.download_url(&file).unwrap(), None)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[CONTENT_DISPOSITION],
        "attachment; filename*=UTF-8''%D0%9E%D1%82%D1%87%D1%91%D1%82%202024%20%28final%29.txt"
    );
    assert_eq!(response.bytes().await.unwrap(), plaintext);
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_downloads_look_the_same() {
    let server = TestServer::start().await.unwrap();
    let file = EncryptedUpload::new("secret.txt", &random_content(30)).unwrap();
    server
        .post_chunk(&file.file_id, &file.data, None)
        .await
        .unwrap();
    let token = file.token.display_unmasked().to_string();
    let other = EncryptedUpload::new("secret.txt", &random_content(30)).unwrap();
    let other_token = other.token.display_unmasked().to_string();
    let missing = FileId::generate().unwrap();

    let mut bodies = Vec::new();
    for url in [
        server.url([file.file_id.as_str(), &token, "Secret.txt"]),
        server.url([file.file_id.as_str(), &other_token, "secret.txt"]),
        server.url([missing.as_str(), &token, "secret.txt"]),
    ] {
        let response = server.get(url.unwrap(), None).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        bodies.push(response.bytes().await.unwrap());
    }
    assert_eq!(bodies[0], bodies[1]);
    assert_eq!(bodies[1], bodies[2]);
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_identifiers() {
    let server = TestServer::start().await.unwrap();
    let file = EncryptedUpload::new("a.txt", &random_content(5)).unwrap();
    let token = file.token.display_unmasked().to_string();

    for segments in [
        ["short", token.as_str(), "a.txt"],
        [file.file_id.as_str(), "not a token", "a.txt"],
        [file.file_id.as_str(), &token[1..], "a.txt"],
    ] {
        let response = server.get(server.url(segments).unwrap(), None).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{segments:?}");
    }

    let response = server
        .get(server.url(["a", "b"]).unwrap(), None)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    server.stop().await.unwrap();
}
