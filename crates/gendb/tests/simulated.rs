// Queries and mutations on the simulated backend, checked against the
// plaintext table.

use std::error::Error;

use gendb::backend::{SimulatedBackend, SimulatedClient};
use gendb::{
    CiphertextCodec, Composition, EngineConfig, Filter, MafCounts, QueryDescriptor, QueryRequest,
    Server,
};
use proptest::prelude::*;
use rand::Rng;

const P: u64 = 65537;
const MASTER: &str = "master";

type Setup = (Server<SimulatedBackend>, SimulatedClient);

fn server(num_slots: usize, columns: &[Vec<u64>]) -> Result<Setup, Box<dyn Error>> {
    let backend = SimulatedBackend::new(num_slots, P)?;
    let client = SimulatedClient::new(&backend);
    let mut server = Server::new(backend, EngineConfig::default().with_threads(3), MASTER)?;
    server.set_data(columns)?;
    server.authorize(MASTER, "client", &client.public_key(), "client-key")?;
    Ok((server, client))
}

fn run(
    server: &Server<SimulatedBackend>,
    client: &SimulatedClient,
    request: QueryRequest,
) -> Result<Vec<Vec<u64>>, Box<dyn Error>> {
    server
        .execute("client-key", "client", &request)
        .into_results()?
        .iter()
        .map(|result| Ok(client.decrypt(&result.ciphertext)?))
        .collect()
}

/// Serialized encryptions of a similarity query vector.
fn encrypted_query(
    server: &Server<SimulatedBackend>,
    values: &[u64],
) -> Result<Vec<Vec<u8>>, Box<dyn Error>> {
    let backend = server.context().backend();
    Ok(server
        .context()
        .encrypt_query(values)?
        .iter()
        .map(|ct| backend.serialize(ct))
        .collect())
}

fn oracle_count(columns: &[Vec<u64>], descriptor: &QueryDescriptor) -> Vec<usize> {
    (0..columns[0].len())
        .filter(|row| {
            let mut tests = descriptor
                .filters
                .iter()
                .map(|f| columns[f.column][*row] == f.value);
            match descriptor.composition {
                Composition::Conjunctive => tests.all(|t| t),
                Composition::Disjunctive => tests.any(|t| t),
            }
        })
        .collect()
}

#[test]
fn non_power_of_two_slots() -> Result<(), Box<dyn Error>> {
    let mut rng = rand::rng();
    for num_slots in [3, 6, 12] {
        let columns = (0..4)
            .map(|_| (0..29).map(|_| rng.random_range(0..3)).collect::<Vec<u64>>())
            .collect::<Vec<_>>();
        let (server, client) = server(num_slots, &columns)?;
        for composition in [Composition::Conjunctive, Composition::Disjunctive] {
            let descriptor = QueryDescriptor::new(
                composition,
                vec![Filter::new(0, 0), Filter::new(2, rng.random_range(0..3))],
            );
            let rows = oracle_count(&columns, &descriptor);
            for parallel in [false, true] {
                let count = run(&server, &client, QueryRequest::Count {
                    descriptor: descriptor.clone(),
                    parallel,
                })?;
                assert_eq!(count[0][0], rows.len() as u64, "{num_slots} slots");

                let maf = run(&server, &client, QueryRequest::Maf {
                    snp_column: 3,
                    descriptor: descriptor.clone(),
                    parallel,
                })?;
                let counts = MafCounts::from_slots(&maf[0]).ok_or("missing slots")?;
                assert_eq!(counts.numerator, rows.iter().map(|r| columns[3][*r]).sum::<u64>());
                assert_eq!(counts.denominator, 2 * rows.len() as u64);
            }
        }
    }
    Ok(())
}

#[test]
fn mutations_are_visible_to_queries() -> Result<(), Box<dyn Error>> {
    let columns = vec![vec![0, 1, 2, 1, 0], vec![1, 1, 2, 0, 0]];
    let (mut server, client) = server(4, &columns)?;
    let ones = QueryDescriptor::new(Composition::Conjunctive, vec![Filter::new(0, 1)]);
    let count = |server: &Server<SimulatedBackend>| -> Result<u64, Box<dyn Error>> {
        Ok(run(server, &client, QueryRequest::Count {
            descriptor: ones.clone(),
            parallel: false,
        })?[0][0])
    };
    assert_eq!(count(&server)?, 2);

    {
        let mut mutations = server.mutations()?;
        mutations.reset_then_set(0, &[0, 1], &[1, 1])?;
        mutations.delete_row_addition(1, &[1, 1])?;
    }
    assert_eq!(count(&server)?, 2);

    server.mutations()?.delete_row_multiplication(3)?;
    assert_eq!(count(&server)?, 1);

    // Row 6 lies past the row mask.
    server.mutations()?.insert_one_row(&[1, 1])?;
    assert_eq!(count(&server)?, 1);
    Ok(())
}

#[test]
fn delete_gate() -> Result<(), Box<dyn Error>> {
    let columns = vec![
        vec![0, 1, 2, 1, 0, 2],
        vec![1, 1, 2, 0, 0, 1],
        vec![1, 0, 1, 0, 1, 1],
    ];
    let (mut server, client) = server(8, &columns)?;
    let request = QueryRequest::Similarity {
        target_column: 2,
        query: encrypted_query(&server, &[1, 1])?,
        threshold: 1,
        parallel: false,
    };

    server.mutations()?.delete_row_multiplication(5)?;
    // Rows 0, 1 and 3 lie within distance 1 of (1, 1).
    let counts = run(&server, &client, request.clone())?;
    assert_eq!((counts[0][0], counts[1][0]), (1, 2));

    server.mutations()?.delete_row_multiplication(4)?;
    let refused = server.execute("client-key", "client", &request).into_results();
    assert!(refused.is_err_and(|reason| reason.contains("Too many deletes")));
    Ok(())
}

#[test]
fn similarity_hides_the_query() -> Result<(), Box<dyn Error>> {
    let mut rng = rand::rng();
    let mut columns = (0..3)
        .map(|_| (0..23).map(|_| rng.random_range(0..3)).collect::<Vec<u64>>())
        .collect::<Vec<_>>();
    let phenotype = (0..23).map(|_| rng.random_range(0..2)).collect::<Vec<u64>>();
    columns.push(phenotype.clone());
    let (server, client) = server(6, &columns)?;

    let genome = [2, 0, 1];
    for threshold in [0, 1, 4] {
        let close = (0..23)
            .filter(|row| {
                let distance = genome
                    .iter()
                    .enumerate()
                    .map(|(c, v)| columns[c][*row].abs_diff(*v).pow(2))
                    .sum::<u64>();
                distance <= threshold
            })
            .collect::<Vec<_>>();
        let with = close.iter().filter(|r| phenotype[**r] == 1).count() as u64;
        for parallel in [false, true] {
            let counts = run(&server, &client, QueryRequest::Similarity {
                target_column: 3,
                query: encrypted_query(&server, &genome)?,
                threshold,
                parallel,
            })?;
            assert_eq!(counts[0][0], with, "threshold {threshold}");
            assert_eq!(counts[1][0], close.len() as u64 - with);
        }
    }
    Ok(())
}

#[test]
fn continuous_columns() -> Result<(), Box<dyn Error>> {
    let ages = vec![20, 30, 3, 40, 12, 7];
    let snps = vec![1, 2, 0, 1, 2, 2];
    let (mut server, _) = server(4, &[ages.clone(), snps])?;
    let request = QueryRequest::CountingRange {
        column: 0,
        lower: 0,
        upper: 10,
    };
    // The ages exceed the inputs of the default 4-bit comparator.
    let refused = server.execute("client-key", "client", &request).into_results();
    assert!(refused.is_err_and(|reason| reason.contains("Comparator inputs")));

    let backend = SimulatedBackend::new(4, P)?;
    let client = SimulatedClient::new(&backend);
    let mut wide = Server::new(backend, EngineConfig::default().with_comparator_bits(6), MASTER)?;
    wide.set_data(&[ages.clone()])?;
    wide.authorize(MASTER, "client", &client.public_key(), "client-key")?;
    let count = run(&wide, &client, request)?;
    assert_eq!(count[0][0], 2);

    // Values are bounded by the column they are written to.
    assert!(wide.mutations()?.update_one_value(7, 0, 41).is_err());
    wide.mutations()?.update_one_value(7, 0, 5)?;
    server.gen_continuous_data(9, 2, 0, 15)?;
    assert!(server.mutations()?.update_one_row(9, &[3, 16]).is_err());
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn risk_scores_are_linear(
        genotypes in prop::collection::vec(prop::collection::vec(0u64..3, 11), 3),
        weights in prop::collection::vec(-50i64..50, 3),
    ) {
        let (server, client) = server(4, &genotypes).unwrap();
        let weighted = weights.iter().copied().enumerate().collect::<Vec<_>>();
        let scores = run(&server, &client, QueryRequest::Prs {
            weights: weighted,
            parallel: true,
        }).unwrap().concat();
        for row in 0..11 {
            let expected = (0..3)
                .map(|c| weights[c] * genotypes[c][row] as i64)
                .sum::<i64>()
                .rem_euclid(P as i64) as u64;
            prop_assert_eq!(scores[row], expected);
        }
    }
}
