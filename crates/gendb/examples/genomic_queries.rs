// Statistical queries over an encrypted genotype table using `gendb`.
//
// A server encrypts a random table of genotypes, an analyst obtains the right
// to query it, and the results are re-encrypted towards the analyst's key so
// that neither the table nor the results are revealed to the server.

mod util;

use std::error::Error;

use clap::Parser;
use console::style;
use gendb::backend::{deserialize_public_key, BfvBackend, BfvClient};
use gendb::{
    Composition, EngineConfig, MafCounts, QueryDescriptor, QueryRequest,
    SchemeParametersBuilder, Server,
};
use util::{generate_genotypes, timeit::timeit};

#[derive(Parser)]
struct Cli {
    #[arg(long, help = "The number of patients", default_value = "5000")]
    num_rows: usize,

    #[arg(long, help = "The number of SNP columns", default_value = "16")]
    num_columns: usize,

    #[arg(
        long,
        help = "The filters, as a list of (column,value) pairs",
        default_value = "[(0,1),(1,2)]"
    )]
    filters: String,

    #[arg(long, help = "Combine the filters with OR instead of AND")]
    disjunctive: bool,

    #[arg(long, help = "The number of worker threads", default_value = "0")]
    threads: usize,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Cli::parse();

    let composition = Composition::from_flag(!args.disjunctive);
    let descriptor = match QueryDescriptor::parse(composition, &args.filters)
        .and_then(|d| d.validate(args.num_columns).map(|_| d))
    {
        Ok(descriptor) => descriptor,
        Err(e) => {
            log::error!("Invalid filters {}: {e}", args.filters);
            clap::Error::new(clap::error::ErrorKind::InvalidValue).exit();
        }
    };

    println!("# Encrypted genomic queries with gendb");
    println!("\tnum_rows = {}", args.num_rows);
    println!("\tnum_columns = {}", args.num_columns);
    println!("\tfilters = {}", args.filters);

    let params = SchemeParametersBuilder::new()
        .set_degree(4096)
        .set_plaintext_modulus(65537)
        .set_moduli_sizes(&[62; 5])
        .build()?;

    let mut server = timeit!(
        "Server setup",
        Server::new(
            BfvBackend::new(&params)?,
            EngineConfig::default().with_threads(args.threads),
            "master",
        )?
    );
    println!("{}", server.context().describe()?);

    let table = generate_genotypes(args.num_rows, args.num_columns);
    timeit!("Table encryption", server.set_data(&table)?);

    // The analyst generates a key pair and sends the public key.
    let client = timeit!(
        "Client setup",
        BfvClient::new(server.context().backend().parameters())
    );
    let key = deserialize_public_key(
        &client.public_key_bytes(),
        server.context().backend().parameters(),
    )?;
    timeit!(
        "Authorization",
        server.authorize("master", "analyst", &key, "analyst-key")?
    );

    let expected = (0..args.num_rows)
        .filter(|row| {
            let mut tests = descriptor
                .filters
                .iter()
                .map(|f| table[f.column][*row] == f.value);
            match composition {
                Composition::Conjunctive => tests.all(|t| t),
                Composition::Disjunctive => tests.any(|t| t),
            }
        })
        .collect::<Vec<_>>();

    for parallel in [false, true] {
        let label = if parallel { "parallel" } else { "sequential" };
        let response = timeit!(
            format!("Count query ({label})"),
            server.execute(
                "analyst-key",
                "analyst",
                &QueryRequest::Count {
                    descriptor: descriptor.clone(),
                    parallel,
                },
            )
        );
        let results = response.into_results()?;
        let count = client.decrypt(&results[0].ciphertext)?[0];
        println!(
            "{} {count} matching rows (expected {})",
            style("  count:").magenta().bold(),
            expected.len()
        );
    }

    let last = args.num_columns - 1;
    let response = timeit!(
        "MAF query",
        server.execute(
            "analyst-key",
            "analyst",
            &QueryRequest::Maf {
                snp_column: last,
                descriptor: descriptor.clone(),
                parallel: false,
            },
        )
    );
    let results = response.into_results()?;
    let counts = MafCounts::from_slots(&client.decrypt(&results[0].ciphertext)?)
        .ok_or("Missing slots")?;
    match counts.frequency() {
        Some(maf) => println!(
            "{} {maf:.4} ({} / {})",
            style("    maf:").magenta().bold(),
            counts.numerator,
            counts.denominator
        ),
        None => println!("{} no matching row", style("    maf:").magenta().bold()),
    }

    let bytes = results[0].to_bytes(server.context().backend());
    println!("📄 Result: {} bytes", bytes.len());
    Ok(())
}
