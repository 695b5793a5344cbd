//! Property tests over the full request pipeline.

use apiforge::prelude::*;
use apiforge::TestClient;
use proptest::prelude::*;
use serde_json::{json, Value};

#[derive(Deserialize, Model)]
struct EchoBody {
    #[field(max_length = 5)]
    suffix: String,
}

#[derive(Deserialize, Model)]
struct EchoInput {
    #[field(query)]
    num: i64,
    body: EchoBody,
}

#[derive(Serialize, Model)]
struct EchoOutputBody {
    suffix: String,
    num: i64,
}

#[derive(Serialize, Model)]
struct EchoOutput {
    body: EchoOutputBody,
}

async fn echo(input: EchoInput) -> Result<EchoOutput> {
    Ok(EchoOutput {
        body: EchoOutputBody {
            suffix: input.body.suffix,
            num: input.num,
        },
    })
}

fn client() -> TestClient {
    let mut api = Api::new(Config::new("Echo", "1.0.0"));
    api.register(Operation::post("/echo").default_status(200), echo)
        .unwrap();
    TestClient::new(api)
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn valid_input_round_trips(num in any::<i64>(), suffix in "[a-z!]{0,5}") {
        let res = runtime().block_on(
            client()
                .post(&format!("/echo?num={}", num))
                .json(&json!({ "suffix": suffix }))
                .send(),
        );
        res.assert_status(200);
        let body: Value = res.json().unwrap();
        prop_assert_eq!(&body["suffix"], &json!(suffix));
        prop_assert_eq!(&body["num"], &json!(num));
    }

    #[test]
    fn long_suffixes_are_rejected_at_their_location(suffix in "[a-z]{6,12}") {
        let res = runtime().block_on(
            client()
                .post("/echo?num=1")
                .json(&json!({ "suffix": suffix }))
                .send(),
        );
        res.assert_status(422);
        let problem: Value = res.json().unwrap();
        prop_assert_eq!(problem["errors"].as_array().map(Vec::len), Some(1));
        prop_assert_eq!(&problem["errors"][0]["message"], "expected length <= 5");
        prop_assert_eq!(&problem["errors"][0]["location"], "body.suffix");
    }
}
