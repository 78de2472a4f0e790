use workflow_service::{
    ExecutorConfig, RepositoryScope, SecretStore, WorkflowExecutor, WorkflowParser,
};

#[tokio::main]
async fn main() {
    let yaml = r#"
name: matrix-demo
on: push
jobs:
  build:
    strategy:
      matrix:
        os: [linux, macos]
        toolchain: [stable, beta]
        exclude:
          - os: macos
            toolchain: beta
    steps:
      - name: Build
        run: echo "building on ${{ matrix.os }} with ${{ matrix.toolchain }}"
  deploy:
    needs: build
    steps:
      - name: Deploy
        env:
          TOKEN: ${{ secrets.DEPLOY_TOKEN }}
        run: echo "deploying with $TOKEN"
"#;

    let workflow = WorkflowParser::parse_and_validate(yaml).expect("Failed to parse");
    let scope = RepositoryScope::new("demo/app");

    let secrets = SecretStore::new();
    secrets
        .put("DEPLOY_TOKEN", "demo-0f3a9c", &scope)
        .expect("Failed to store secret");

    let executor = WorkflowExecutor::from_workflow(&workflow)
        .expect("Failed to build graph")
        .with_config(ExecutorConfig {
            scope,
            ..ExecutorConfig::default()
        })
        .with_secrets(secrets);

    for (level, instances) in executor.graph().parallel_levels().iter().enumerate() {
        let names: Vec<String> = instances.iter().map(|i| i.id.to_string()).collect();
        println!("level {}: {}", level + 1, names.join(", "));
    }

    let result = executor.execute().await;
    println!("\nstatus: {}", result.status);
    for outcome in &result.jobs {
        for step in &outcome.steps {
            println!("  {} / {}: {}", outcome.id, step.name, step.stdout);
        }
    }
}
