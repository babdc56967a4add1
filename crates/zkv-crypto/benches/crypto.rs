use std::io::Cursor;

use zkv_crypto::{
    encrypt_stream, generate_dek, seal_default, unwrap_dek, verify, wrap_dek, AeadAlgorithm,
    DataKey, DecryptSession, MasterKey, PlaintextSource, ReaderSource, SecretSlot,
    CANARY_PLAINTEXT,
};

const CHUNK_SIZE: u32 = 64 * 1024;

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

#[divan::bench(args = [AeadAlgorithm::ChaCha20Poly1305, AeadAlgorithm::Aes256Gcm])]
fn bench_wrap_unwrap(bencher: divan::Bencher, algorithm: AeadAlgorithm) {
    let master = MasterKey::from_bytes([0x42; 32]);
    let dek = generate_dek().unwrap();
    bencher.bench(|| {
        let wrapped = wrap_dek(divan::black_box(&master), &dek, algorithm).unwrap();
        unwrap_dek(&master, &wrapped).unwrap()
    });
}

/// How a canary check is set up to fail, if at all. Every variant should
/// report the same time: a gap between `Correct` and the rest, or between
/// an early and a late difference, is a timing leak in the password check.
#[derive(Debug, Clone, Copy)]
enum Candidate {
    Correct,
    WrongKey,
    TagFirstByte,
    TagLastByte,
    PlaintextFirstByte,
    PlaintextLastByte,
}

#[divan::bench(args = [
    Candidate::Correct,
    Candidate::WrongKey,
    Candidate::TagFirstByte,
    Candidate::TagLastByte,
    Candidate::PlaintextFirstByte,
    Candidate::PlaintextLastByte,
])]
fn bench_canary_verify(bencher: divan::Bencher, candidate: Candidate) {
    let mut canary = seal_default(&MasterKey::from_bytes([0x42; 32]), AeadAlgorithm::default())
        .unwrap();
    let key = match candidate {
        Candidate::WrongKey => MasterKey::from_bytes([0x43; 32]),
        _ => MasterKey::from_bytes([0x42; 32]),
    };
    let mut expected = CANARY_PLAINTEXT.to_vec();
    let last = expected.len() - 1;
    match candidate {
        Candidate::TagFirstByte => canary.tag[0] ^= 0x01,
        Candidate::TagLastByte => canary.tag[canary.tag.len() - 1] ^= 0x01,
        Candidate::PlaintextFirstByte => expected[0] ^= 0x01,
        Candidate::PlaintextLastByte => expected[last] ^= 0x01,
        Candidate::Correct | Candidate::WrongKey => {}
    }
    assert_eq!(
        verify(&key, &canary, &expected),
        matches!(candidate, Candidate::Correct)
    );

    bencher.bench(|| {
        verify(
            divan::black_box(&key),
            divan::black_box(&canary),
            divan::black_box(&expected),
        )
    });
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_encrypt_stream(bencher: divan::Bencher, size: usize) {
    let dek = generate_dek().unwrap();
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            encrypt_stream(
                divan::black_box(&dek),
                AeadAlgorithm::default(),
                CHUNK_SIZE,
                divan::black_box(&data),
            )
            .unwrap()
        });
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_decrypt_stream(bencher: divan::Bencher, size: usize) {
    let key_bytes = [0x17u8; 32];
    let data = make_data(size);
    let encrypted = encrypt_stream(
        &DataKey::from_bytes(key_bytes),
        AeadAlgorithm::default(),
        CHUNK_SIZE,
        &data,
    )
    .unwrap();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();

    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            runtime.block_on(async {
                let slot = SecretSlot::new("bench", DataKey::from_bytes(key_bytes));
                let source = ReaderSource::new(Cursor::new(divan::black_box(&encrypted[..])));
                let mut session = DecryptSession::open(source, slot, CHUNK_SIZE).await.unwrap();
                let mut total = 0usize;
                while let Some(chunk) = session.next_chunk().await.unwrap() {
                    total += chunk.len();
                }
                total
            })
        });
}

fn main() {
    divan::main();
}
