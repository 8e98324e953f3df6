//! REST + git implementation of [`GithubClient`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use super::{GithubClient, PrFile, PrHistory};
use crate::constants;
use crate::events::{Comment, Issue, PullRequest, Review, ReviewComment};
use crate::workspace::manager::run_git;
use crate::workspace::{RepoRef, Workspace};

const PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
struct RepositoryInfo {
    default_branch: String,
}

/// GitHub client over the REST API.
#[derive(Debug, Clone)]
pub struct RestGithubClient {
    client: Client,
    api_url: String,
    token: String,
}

impl RestGithubClient {
    /// Creates a client for `api_url` authenticated with `token`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(constants::HTTP_REQUEST_TIMEOUT)
            .user_agent(constants::USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::with_client(client, api_url, token))
    }

    /// Creates a client with a pre-configured HTTP client.
    pub fn with_client(client: Client, api_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.api_url, path))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if self.token.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.token)
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.get_json_query(path, &[]).await
    }

    /// GET with query parameters encoded by reqwest.
    async fn get_json_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let response = self
            .request(Method::GET, path)
            .query(query)
            .send()
            .await
            .with_context(|| format!("GET {} failed", path))?;
        if !response.status().is_success() {
            anyhow::bail!("GET {} returned {}", path, response.status());
        }
        response
            .json()
            .await
            .with_context(|| format!("Invalid response from GET {}", path))
    }

    async fn send_json(&self, method: Method, path: &str, body: serde_json::Value) -> Result<reqwest::Response> {
        let response = self
            .request(method.clone(), path)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("{} {} failed", method, path))?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("{} {} returned {}: {}", method, path, status, text);
        }
        Ok(response)
    }

    fn repo_path(repo: &RepoRef) -> String {
        format!("/repos/{}/{}", repo.owner, repo.name)
    }
}

#[async_trait]
impl GithubClient for RestGithubClient {
    async fn create_branch(&self, workspace: &Workspace) -> Result<()> {
        let message = match workspace.key.source {
            crate::workspace::Source::Issue(n) => format!("Start work on #{}", n),
            crate::workspace::Source::PullRequest(n) => format!("Start work on PR #{}", n),
        };
        // GitHub refuses a PR without commits, so seed the branch.
        run_git(&workspace.path, &["commit", "--allow-empty", "-m", &message]).await?;
        run_git(&workspace.path, &["push", "-u", "origin", &workspace.branch])
            .await
            .with_context(|| format!("Failed to push branch {}", workspace.branch))?;
        log::info!("Pushed branch {} to {}", workspace.branch, workspace.repo);
        Ok(())
    }

    async fn create_pull_request(
        &self,
        workspace: &Workspace,
        title: &str,
        body: &str,
    ) -> Result<PullRequest> {
        let repo_path = Self::repo_path(&workspace.repo);
        let info: RepositoryInfo = self.get_json(&repo_path).await?;
        let response = self
            .send_json(
                Method::POST,
                &format!("{}/pulls", repo_path),
                json!({
                    "title": title,
                    "head": workspace.branch,
                    "base": info.default_branch,
                    "body": body,
                }),
            )
            .await?;
        let pr: PullRequest = response.json().await.context("Invalid pull request response")?;
        log::info!("Created PR #{} {}", pr.number, pr.html_url);
        Ok(pr)
    }

    async fn update_pull_request(&self, repo: &RepoRef, pr: u64, body: &str) -> Result<()> {
        self.send_json(
            Method::PATCH,
            &format!("{}/pulls/{}", Self::repo_path(repo), pr),
            json!({ "body": body }),
        )
        .await?;
        Ok(())
    }

    async fn pull_latest_changes(&self, workspace: &Workspace, pr: &PullRequest) -> Result<()> {
        let branch = &pr.head.ref_name;
        run_git(&workspace.path, &["fetch", "origin", branch]).await?;
        run_git(&workspace.path, &["merge", "--ff-only", "FETCH_HEAD"])
            .await
            .with_context(|| format!("Failed to fast-forward to origin/{}", branch))?;
        Ok(())
    }

    async fn commit_and_push(&self, workspace: &Workspace, message: &str) -> Result<bool> {
        run_git(&workspace.path, &["add", "-A"]).await?;
        let status = run_git(&workspace.path, &["status", "--porcelain"]).await?;
        if status.is_empty() {
            log::info!("No changes to commit in {}", workspace.path.display());
            return Ok(false);
        }

        run_git(&workspace.path, &["commit", "-m", message]).await?;
        let refspec = format!("HEAD:refs/heads/{}", workspace.branch);
        run_git(&workspace.path, &["push", "origin", &refspec])
            .await
            .with_context(|| format!("Failed to push {}", workspace.branch))?;
        log::info!("Pushed changes to {}", workspace.branch);
        Ok(true)
    }

    async fn create_comment(&self, repo: &RepoRef, number: u64, body: &str) -> Result<()> {
        self.send_json(
            Method::POST,
            &format!("{}/issues/{}/comments", Self::repo_path(repo), number),
            json!({ "body": body }),
        )
        .await?;
        Ok(())
    }

    async fn reply_to_review_comment(
        &self,
        repo: &RepoRef,
        pr: u64,
        comment_id: u64,
        body: &str,
    ) -> Result<()> {
        self.send_json(
            Method::POST,
            &format!(
                "{}/pulls/{}/comments/{}/replies",
                Self::repo_path(repo),
                pr,
                comment_id
            ),
            json!({ "body": body }),
        )
        .await?;
        Ok(())
    }

    async fn get_pull_request(&self, repo: &RepoRef, number: u64) -> Result<PullRequest> {
        self.get_json(&format!("{}/pulls/{}", Self::repo_path(repo), number))
            .await
    }

    async fn get_all_comments(&self, repo: &RepoRef, pr: &PullRequest) -> Result<PrHistory> {
        let base = Self::repo_path(repo);
        let issue_comments: Vec<Comment> = self
            .get_json(&format!("{}/issues/{}/comments?per_page={}", base, pr.number, PAGE_SIZE))
            .await?;
        let review_comments: Vec<ReviewComment> = self
            .get_json(&format!("{}/pulls/{}/comments?per_page={}", base, pr.number, PAGE_SIZE))
            .await?;
        let reviews: Vec<Review> = self
            .get_json(&format!("{}/pulls/{}/reviews?per_page={}", base, pr.number, PAGE_SIZE))
            .await?;
        Ok(PrHistory {
            pr_body: pr.body_text().to_string(),
            issue_comments,
            review_comments,
            reviews,
        })
    }

    async fn delete_branch(&self, repo: &RepoRef, branch: &str) -> Result<()> {
        let path = format!("{}/git/refs/heads/{}", Self::repo_path(repo), branch);
        let response = self
            .request(Method::DELETE, &path)
            .send()
            .await
            .with_context(|| format!("DELETE {} failed", path))?;
        match response.status() {
            s if s.is_success() => Ok(()),
            StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => {
                log::debug!("Branch {} already gone", branch);
                Ok(())
            }
            s => anyhow::bail!("Failed to delete branch {}: {}", branch, s),
        }
    }

    async fn get_review_comments(
        &self,
        repo: &RepoRef,
        pr: u64,
        review_id: u64,
    ) -> Result<Vec<ReviewComment>> {
        self.get_json(&format!(
            "{}/pulls/{}/reviews/{}/comments?per_page={}",
            Self::repo_path(repo),
            pr,
            review_id,
            PAGE_SIZE
        ))
        .await
    }

    async fn list_pull_request_files(&self, repo: &RepoRef, pr: u64) -> Result<Vec<PrFile>> {
        self.get_json(&format!(
            "{}/pulls/{}/files?per_page={}",
            Self::repo_path(repo),
            pr,
            PAGE_SIZE
        ))
        .await
    }

    async fn list_issues_with_label(
        &self,
        repo: &RepoRef,
        label: &str,
        limit: usize,
    ) -> Result<Vec<Issue>> {
        let per_page = PAGE_SIZE.min(limit.max(1)).to_string();
        let issues: Vec<Issue> = self
            .get_json_query(
                &format!("{}/issues", Self::repo_path(repo)),
                &[("state", "open"), ("labels", label), ("per_page", per_page.as_str())],
            )
            .await?;
        Ok(issues
            .into_iter()
            .filter(|issue| !issue.is_pull_request())
            .take(limit)
            .collect())
    }
}
