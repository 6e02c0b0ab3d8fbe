use kube::CustomResourceExt as _;
use security_policy_crd::SecurityPolicy;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&SecurityPolicy::crd())?);
    Ok(())
}
